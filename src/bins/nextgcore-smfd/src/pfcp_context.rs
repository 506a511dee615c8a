//! PFCP Session Rule Graph
//!
//! Per-session store of PDR/FAR/QER/URR objects and their associations.
//! A PDR is always created against an existing FAR, so every PDR carries
//! exactly one FAR association; QER and URR associations are zero or more.

use std::net::{Ipv4Addr, Ipv6Addr};

// ============================================================================
// Identifiers and Constants
// ============================================================================

pub type PdrId = u16;
pub type FarId = u32;
pub type QerId = u32;
pub type UrrId = u32;

/// CHOOSE ID used for the default bearer's UPF-allocated F-TEID
pub const OGS_PFCP_DEFAULT_CHOOSE_ID: u8 = 5;

/// Map a GTP-U TEID index into a UPF TEID range (TS 29.244 8.2.82)
pub fn gtpu_index_to_teid(index: u32, teidri: u8, teid_range: u8) -> u32 {
    if teidri == 0 {
        return index;
    }
    let shift = 32 - u32::from(teidri.min(7));
    let mask = (1u32 << shift) - 1;
    (u32::from(teid_range) << shift) | (index & mask)
}

// ============================================================================
// IE-level Types
// ============================================================================

/// Source Interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SourceInterface {
    #[default]
    Access = 0,
    Core = 1,
    SgiLanN6Lan = 2,
    CpFunction = 3,
}

/// Destination Interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DestinationInterface {
    #[default]
    Access = 0,
    Core = 1,
    SgiLanN6Lan = 2,
    CpFunction = 3,
}

/// Apply Action flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyAction {
    pub drop: bool,
    pub forw: bool,
    pub buff: bool,
    pub nocp: bool,
    pub dupl: bool,
}

impl ApplyAction {
    pub fn forward() -> Self {
        Self { forw: true, ..Default::default() }
    }
}

/// F-TEID as carried in a PDR's PDI
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FTeid {
    pub ipv4: bool,
    pub ipv6: bool,
    pub ch: bool,   // CHOOSE bit
    pub chid: bool, // CHOOSE ID bit
    pub choose_id: Option<u8>,
    pub teid: u32,
    pub addr: Option<Ipv4Addr>,
    pub addr6: Option<Ipv6Addr>,
}

impl FTeid {
    /// Ask the UP function to allocate the F-TEID
    pub fn choose(choose_id: Option<u8>) -> Self {
        Self {
            ipv4: true,
            ipv6: true,
            ch: true,
            chid: choose_id.is_some(),
            choose_id,
            ..Default::default()
        }
    }

    /// F-TEID with an address picked by the CP function
    pub fn with_addr(addr: Option<Ipv4Addr>, addr6: Option<Ipv6Addr>, teid: u32) -> Self {
        Self {
            ipv4: addr.is_some(),
            ipv6: addr6.is_some(),
            teid,
            addr,
            addr6,
            ..Default::default()
        }
    }
}

/// UE IP Address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UeIpAddress {
    pub addr: Option<Ipv4Addr>,
    pub addr6: Option<Ipv6Addr>,
    /// S/D flag: set when the address is the destination (downlink)
    pub sd: bool,
}

/// Outer Header Creation (GTP-U/UDP/IP)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OuterHeaderCreation {
    pub gtpu4: bool,
    pub gtpu6: bool,
    pub teid: u32,
    pub addr: Option<Ipv4Addr>,
    pub addr6: Option<Ipv6Addr>,
}

impl OuterHeaderCreation {
    /// Returns None when neither address family is present
    pub fn from_ip(addr: Option<Ipv4Addr>, addr6: Option<Ipv6Addr>, teid: u32) -> Option<Self> {
        if addr.is_none() && addr6.is_none() {
            return None;
        }
        Some(Self {
            gtpu4: addr.is_some(),
            gtpu6: addr6.is_some(),
            teid,
            addr,
            addr6,
        })
    }
}

/// SDF filter attached to a PDR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdfFilter {
    /// FD flag: the filter carries a flow description
    pub fd: bool,
    pub description: String,
}

impl SdfFilter {
    pub fn flow_description(description: impl Into<String>) -> Self {
        Self {
            fd: true,
            description: description.into(),
        }
    }
}

/// Bit rate (bps)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bitrate {
    pub uplink: u64,
    pub downlink: u64,
}

/// Measurement Method flags (TS 29.244 8.2.40)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeasurementMethod {
    pub durat: bool,
    pub volum: bool,
    pub event: bool,
}

/// Volume Threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeThreshold {
    pub tovol: bool,
    pub ulvol: bool,
    pub dlvol: bool,
    pub total_volume: u64,
    pub uplink_volume: u64,
    pub downlink_volume: u64,
}

/// Reporting Triggers (subset used by the SMF)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportingTriggers {
    pub perio: bool,
    pub volth: bool,
    pub timth: bool,
    pub volqu: bool,
    pub timqu: bool,
}

// ============================================================================
// Rule Objects
// ============================================================================

/// Packet Detection Rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdr {
    pub id: PdrId,
    pub precedence: u32,
    pub src_if: SourceInterface,
    /// Locally allocated TEID index
    pub teid: u32,
    pub f_teid: Option<FTeid>,
    pub ue_ip_addr: Option<UeIpAddress>,
    pub flows: Vec<SdfFilter>,
    pub far_id: FarId,
    pub qer_ids: Vec<QerId>,
    pub urr_ids: Vec<UrrId>,
}

/// Forwarding Action Rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Far {
    pub id: FarId,
    pub apply_action: ApplyAction,
    pub dst_if: DestinationInterface,
    pub outer_header_creation: Option<OuterHeaderCreation>,
}

/// QoS Enforcement Rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qer {
    pub id: QerId,
    pub mbr: Bitrate,
    pub gbr: Bitrate,
}

/// Usage Reporting Rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Urr {
    pub id: UrrId,
    /// Charging rating group metered by this URR (0 = none)
    pub rating_group: u32,
    pub meas_method: MeasurementMethod,
    pub vol_threshold: VolumeThreshold,
    /// Seconds, 0 = unset
    pub time_threshold: u32,
    pub rep_triggers: ReportingTriggers,
}

// ============================================================================
// Rule Graph
// ============================================================================

/// Rule graph of one PFCP session
#[derive(Debug, Clone, Default)]
pub struct PfcpSess {
    /// Added to each PDR id to form its TEID index
    teid_base: u32,
    pdrs: Vec<Pdr>,
    fars: Vec<Far>,
    qers: Vec<Qer>,
    urrs: Vec<Urr>,
    next_pdr_id: PdrId,
    next_far_id: FarId,
    next_qer_id: QerId,
    next_urr_id: UrrId,
}

impl PfcpSess {
    pub fn new(teid_base: u32) -> Self {
        Self {
            teid_base,
            ..Default::default()
        }
    }

    // --- creation ---

    pub fn far_add(&mut self, dst_if: DestinationInterface) -> FarId {
        self.next_far_id += 1;
        let id = self.next_far_id;
        self.fars.push(Far {
            id,
            apply_action: ApplyAction::default(),
            dst_if,
            outer_header_creation: None,
        });
        id
    }

    /// Create a PDR paired with `far_id`.
    ///
    /// # Panics
    ///
    /// If `far_id` does not name a FAR of this session.
    pub fn pdr_add(&mut self, src_if: SourceInterface, far_id: FarId) -> PdrId {
        assert!(
            self.far(far_id).is_some(),
            "PDR must be paired with an existing FAR (far_id={far_id})"
        );
        self.next_pdr_id += 1;
        let id = self.next_pdr_id;
        self.pdrs.push(Pdr {
            id,
            precedence: 0,
            src_if,
            teid: self.teid_base + u32::from(id),
            f_teid: None,
            ue_ip_addr: None,
            flows: Vec::new(),
            far_id,
            qer_ids: Vec::new(),
            urr_ids: Vec::new(),
        });
        id
    }

    pub fn qer_add(&mut self, mbr: Bitrate) -> QerId {
        self.next_qer_id += 1;
        let id = self.next_qer_id;
        self.qers.push(Qer {
            id,
            mbr,
            gbr: Bitrate::default(),
        });
        id
    }

    pub fn urr_add(&mut self, rating_group: u32) -> UrrId {
        self.next_urr_id += 1;
        let id = self.next_urr_id;
        self.urrs.push(Urr {
            id,
            rating_group,
            meas_method: MeasurementMethod::default(),
            vol_threshold: VolumeThreshold::default(),
            time_threshold: 0,
            rep_triggers: ReportingTriggers::default(),
        });
        id
    }

    // --- lookup ---

    pub fn pdr(&self, id: PdrId) -> Option<&Pdr> {
        self.pdrs.iter().find(|p| p.id == id)
    }

    pub fn pdr_mut(&mut self, id: PdrId) -> Option<&mut Pdr> {
        self.pdrs.iter_mut().find(|p| p.id == id)
    }

    pub fn far(&self, id: FarId) -> Option<&Far> {
        self.fars.iter().find(|f| f.id == id)
    }

    pub fn far_mut(&mut self, id: FarId) -> Option<&mut Far> {
        self.fars.iter_mut().find(|f| f.id == id)
    }

    pub fn qer(&self, id: QerId) -> Option<&Qer> {
        self.qers.iter().find(|q| q.id == id)
    }

    pub fn qer_mut(&mut self, id: QerId) -> Option<&mut Qer> {
        self.qers.iter_mut().find(|q| q.id == id)
    }

    pub fn urr(&self, id: UrrId) -> Option<&Urr> {
        self.urrs.iter().find(|u| u.id == id)
    }

    pub fn urr_mut(&mut self, id: UrrId) -> Option<&mut Urr> {
        self.urrs.iter_mut().find(|u| u.id == id)
    }

    pub fn urr_find_by_rating_group(&self, rating_group: u32) -> Option<UrrId> {
        self.urrs
            .iter()
            .find(|u| u.rating_group == rating_group)
            .map(|u| u.id)
    }

    pub fn pdrs(&self) -> &[Pdr] {
        &self.pdrs
    }

    pub fn fars(&self) -> &[Far] {
        &self.fars
    }

    pub fn qers(&self) -> &[Qer] {
        &self.qers
    }

    pub fn urrs(&self) -> &[Urr] {
        &self.urrs
    }

    // --- association ---

    fn expect_pdr_mut(&mut self, pdr_id: PdrId) -> &mut Pdr {
        match self.pdrs.iter_mut().find(|p| p.id == pdr_id) {
            Some(pdr) => pdr,
            None => panic!("PDR {pdr_id} is not part of this session"),
        }
    }

    pub fn pdr_associate_qer(&mut self, pdr_id: PdrId, qer_id: QerId) {
        assert!(self.qer(qer_id).is_some(), "QER {qer_id} does not exist");
        let pdr = self.expect_pdr_mut(pdr_id);
        if !pdr.qer_ids.contains(&qer_id) {
            pdr.qer_ids.push(qer_id);
        }
    }

    pub fn pdr_associate_urr(&mut self, pdr_id: PdrId, urr_id: UrrId) {
        assert!(self.urr(urr_id).is_some(), "URR {urr_id} does not exist");
        let pdr = self.expect_pdr_mut(pdr_id);
        if !pdr.urr_ids.contains(&urr_id) {
            pdr.urr_ids.push(urr_id);
        }
    }

    // --- removal ---

    /// Remove a URR and every association to it
    pub fn urr_remove(&mut self, urr_id: UrrId) -> Option<Urr> {
        let pos = self.urrs.iter().position(|u| u.id == urr_id)?;
        for pdr in self.pdrs.iter_mut() {
            pdr.urr_ids.retain(|id| *id != urr_id);
        }
        Some(self.urrs.remove(pos))
    }

    /// Remove a QER and every association to it
    pub fn qer_remove(&mut self, qer_id: QerId) -> Option<Qer> {
        let pos = self.qers.iter().position(|q| q.id == qer_id)?;
        for pdr in self.pdrs.iter_mut() {
            pdr.qer_ids.retain(|id| *id != qer_id);
        }
        Some(self.qers.remove(pos))
    }
}
