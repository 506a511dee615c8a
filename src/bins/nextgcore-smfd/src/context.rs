//! SMF Context Management
//!
//! Session, bearer and policy-rule context for the Gx/S8 control path, and the
//! process-owned `SmfContext` session table.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::binding::BearerBinding;
use crate::config::SmfConfig;
use crate::error::{SmfError, SmfResult};
use crate::gx_handler;
use crate::gx_message::GxMessage;
use crate::mirror::MirrorContext;
use crate::pfcp_context::{
    Bitrate, DestinationInterface, FarId, PdrId, PfcpSess, QerId, SourceInterface,
};
use crate::s8_handler::{GtpPath, PfcpPath};
use crate::s8_sm::{self, S8Event, S8Fsm, S8FsmResult, S8State};
use crate::timer::{SmfTimerConfigs, SmfTimerId};

// ============================================================================
// Basic Types
// ============================================================================

/// IP Address (IPv4 and/or IPv6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IpAddr {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl IpAddr {
    pub fn v4(addr: Ipv4Addr) -> Self {
        Self {
            ipv4: Some(addr),
            ipv6: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ipv4.is_none() && self.ipv6.is_none()
    }
}

/// Allocation and Retention Priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Arp {
    pub priority_level: u8,
    pub pre_emption_capability: bool,
    pub pre_emption_vulnerability: bool,
}

/// QoS parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Qos {
    /// QCI / 5QI
    pub index: u8,
    pub arp: Arp,
    pub mbr: Bitrate,
    pub gbr: Bitrate,
}

/// Session AMBR (bps)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionAmbr {
    pub uplink: u64,
    pub downlink: u64,
}

impl SessionAmbr {
    pub fn is_zero(&self) -> bool {
        self.uplink == 0 && self.downlink == 0
    }
}

/// Flow direction (TS 29.212 Flow-Direction)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowDirection {
    DownlinkOnly = 1,
    UplinkOnly = 2,
    #[default]
    Bidirectional = 3,
}

impl FlowDirection {
    pub fn is_uplink(&self) -> bool {
        matches!(self, FlowDirection::UplinkOnly | FlowDirection::Bidirectional)
    }

    pub fn is_downlink(&self) -> bool {
        matches!(self, FlowDirection::DownlinkOnly | FlowDirection::Bidirectional)
    }
}

/// A flow description from a PCC rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    pub direction: FlowDirection,
    /// IPFilterRule text, e.g. "permit out ip from any to assigned"
    pub description: String,
}

impl Flow {
    pub fn new(direction: FlowDirection, description: &str) -> Self {
        Self {
            direction,
            description: description.to_string(),
        }
    }
}

/// PCC Rule
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PccRule {
    pub name: String,
    /// Charging rating group, 0 = unrated
    pub rating_group: u32,
    pub precedence: u32,
    pub flow_status: u8,
    pub qos: Qos,
    pub flows: Vec<Flow>,
}

impl PccRule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_rating_group(mut self, rating_group: u32) -> Self {
        self.rating_group = rating_group;
        self
    }

    pub fn add_flow(&mut self, direction: FlowDirection, description: &str) {
        self.flows.push(Flow::new(direction, description));
    }
}

// ============================================================================
// User Plane Node
// ============================================================================

/// UP Function Features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpFunctionFeatures {
    /// F-TEID allocation/release in the UP function
    pub ftup: bool,
    pub bucp: bool,
    pub ddnd: bool,
    pub dlbd: bool,
}

/// User Plane IP Resource Information advertised by a UPF
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GtpuResource {
    /// Network instance (DNN) the resource is restricted to; None matches any
    pub dnn: Option<String>,
    /// Source interface the resource is restricted to; None matches any
    pub source_interface: Option<SourceInterface>,
    pub addr: Option<Ipv4Addr>,
    pub addr6: Option<Ipv6Addr>,
    /// TEID range indication (number of bits)
    pub teidri: u8,
    pub teid_range: u8,
}

/// PFCP peer (UPF) serving a session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PfcpNode {
    pub id: u64,
    pub up_function_features: UpFunctionFeatures,
    pub gtpu_resources: Vec<GtpuResource>,
    /// Addresses the node is bound on, in configuration order
    pub addr_list: Vec<std::net::IpAddr>,
}

impl PfcpNode {
    /// First GTP-U resource matching the DNN and source interface
    pub fn find_gtpu_resource(
        &self,
        dnn: Option<&str>,
        src_if: SourceInterface,
    ) -> Option<&GtpuResource> {
        self.gtpu_resources.iter().find(|resource| {
            let match_dnn = match (&resource.dnn, dnn) {
                (Some(configured), Some(dnn)) => configured == dnn,
                (Some(_), None) => false,
                (None, _) => true,
            };
            let match_src_if = resource
                .source_interface
                .map_or(true, |configured| configured == src_if);
            match_dnn && match_src_if
        })
    }
}

// ============================================================================
// SMF Bearer Context
// ============================================================================

/// SMF Bearer context: UL/DL PDR+FAR pair and its tunnel endpoints
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SmfBearer {
    pub id: u64,
    /// EPS Bearer ID
    pub ebi: u8,
    pub ul_pdr: PdrId,
    pub dl_pdr: PdrId,
    pub ul_far: FarId,
    pub dl_far: FarId,
    /// PGW S5U (local, UPF side)
    pub pgw_s5u_teid: u32,
    pub pgw_s5u_addr: Option<Ipv4Addr>,
    pub pgw_s5u_addr6: Option<Ipv6Addr>,
    /// SGW S5U (peer)
    pub sgw_s5u_teid: u32,
    pub sgw_s5u_ip: IpAddr,
    pub qos: Qos,
}

// ============================================================================
// SMF Session Context
// ============================================================================

/// Change flags computed by the last policy install
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GtpFlags {
    /// APN-AMBR must be signalled in the Create Session Response
    pub create_session_response_apn_ambr: bool,
    /// Bearer QoS must be signalled in the Create Session Response
    pub create_session_response_bearer_qos: bool,
}

/// SMF Session context
#[derive(Debug, Clone)]
pub struct SmfSess {
    pub id: u64,
    pub index: u32,
    /// IMSI (BCD string)
    pub imsi_bcd: String,
    /// Session name (APN/DNN)
    pub session_name: Option<String>,
    /// UE IPv4 address
    pub ipv4_addr: Option<Ipv4Addr>,
    /// UE IPv6 prefix (length, prefix)
    pub ipv6_prefix: Option<(u8, Ipv6Addr)>,
    pub sgw_s5c_teid: u32,
    pub smf_n4_teid: u32,
    pub session_ambr: SessionAmbr,
    pub session_qos: Qos,
    /// Active PCC rules, replaced wholesale by every install
    pub pcc_rules: Vec<PccRule>,
    /// Rule graph
    pub pfcp: PfcpSess,
    /// UPF serving this session
    pub pfcp_node: Option<PfcpNode>,
    pub default_bearer: Option<SmfBearer>,
    pub cp2up_pdr: Option<PdrId>,
    pub up2cp_pdr: Option<PdrId>,
    pub up2cp_far: Option<FarId>,
    /// Shared AMBR QER of the default PDRs
    pub ambr_qer: Option<QerId>,
    pub gtp: GtpFlags,
    /// S8 transaction state machine
    pub s8: S8Fsm,
}

impl SmfSess {
    pub fn new(id: u64, index: u32, imsi_bcd: &str, session_name: Option<&str>) -> Self {
        Self {
            id,
            index,
            imsi_bcd: imsi_bcd.to_string(),
            session_name: session_name.map(str::to_string),
            ipv4_addr: None,
            ipv6_prefix: None,
            sgw_s5c_teid: 0,
            smf_n4_teid: index,
            session_ambr: SessionAmbr::default(),
            session_qos: Qos::default(),
            pcc_rules: Vec::new(),
            pfcp: PfcpSess::new(index << 8),
            pfcp_node: None,
            default_bearer: None,
            cp2up_pdr: None,
            up2cp_pdr: None,
            up2cp_far: None,
            ambr_qer: None,
            gtp: GtpFlags::default(),
            s8: S8Fsm::new(),
        }
    }

    pub fn set_ipv4_addr(&mut self, addr: Ipv4Addr) {
        self.ipv4_addr = Some(addr);
    }

    pub fn set_ipv6_prefix(&mut self, prefix_len: u8, addr: Ipv6Addr) {
        self.ipv6_prefix = Some((prefix_len, addr));
    }

    /// Allocate the default bearer's UL/DL PDR+FAR pairs.
    ///
    /// Runs at establishment, before any policy is compiled.
    pub fn create_default_bearer(
        &mut self,
        ebi: u8,
        sgw_s5u_ip: IpAddr,
        sgw_s5u_teid: u32,
    ) -> &mut SmfBearer {
        let ul_far = self.pfcp.far_add(DestinationInterface::Core);
        let dl_far = self.pfcp.far_add(DestinationInterface::Access);
        let ul_pdr = self.pfcp.pdr_add(SourceInterface::Access, ul_far);
        let dl_pdr = self.pfcp.pdr_add(SourceInterface::Core, dl_far);

        log::debug!(
            "[{}] default bearer EBI[{}] UL PDR[{}] DL PDR[{}]",
            self.imsi_bcd, ebi, ul_pdr, dl_pdr
        );

        self.default_bearer.insert(SmfBearer {
            id: self.id,
            ebi,
            ul_pdr,
            dl_pdr,
            ul_far,
            dl_far,
            sgw_s5u_teid,
            sgw_s5u_ip,
            ..Default::default()
        })
    }

    /// Create the CP<->UP forwarding PDRs and the UP->CP FAR if absent.
    ///
    /// # Panics
    ///
    /// If the default bearer has not been created.
    pub fn create_cp_up_data_forwarding(&mut self) {
        let dl_far = match &self.default_bearer {
            Some(bearer) => bearer.dl_far,
            None => panic!("CP/UP forwarding requires the default bearer"),
        };

        if self.cp2up_pdr.is_none() {
            let pdr = self.pfcp.pdr_add(SourceInterface::CpFunction, dl_far);
            self.cp2up_pdr = Some(pdr);
        }
        if self.up2cp_far.is_none() {
            self.up2cp_far = Some(self.pfcp.far_add(DestinationInterface::CpFunction));
        }
        if self.up2cp_pdr.is_none() {
            let far = self.up2cp_far.unwrap_or_default();
            let pdr = self.pfcp.pdr_add(SourceInterface::Access, far);
            self.up2cp_pdr = Some(pdr);
        }
    }

    /// Case-insensitive session-name comparison
    pub fn is_session_name(&self, name: &str) -> bool {
        self.session_name
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn state(&self) -> S8State {
        self.s8.state
    }
}

// ============================================================================
// SMF Context (Main)
// ============================================================================

/// SMF context: owns every session and the mirror; built at startup and
/// torn down at shutdown
pub struct SmfContext {
    pub config: SmfConfig,
    timers: SmfTimerConfigs,
    mirror: MirrorContext,
    sess_list: HashMap<u64, SmfSess>,
    next_sess_id: u64,
    next_sess_index: u32,
}

impl SmfContext {
    pub fn new(config: SmfConfig, mirror: MirrorContext) -> Self {
        Self {
            timers: SmfTimerConfigs::from_config(&config),
            config,
            mirror,
            sess_list: HashMap::new(),
            next_sess_id: 1,
            next_sess_index: 1,
        }
    }

    pub fn mirror(&self) -> &MirrorContext {
        &self.mirror
    }

    pub fn mirror_mut(&mut self) -> &mut MirrorContext {
        &mut self.mirror
    }

    /// Add a session; its S8 state machine is initialised to Operational
    pub fn sess_add(&mut self, imsi_bcd: &str, session_name: Option<&str>) -> &mut SmfSess {
        let id = self.next_sess_id;
        self.next_sess_id += 1;
        let index = self.next_sess_index;
        self.next_sess_index = self.next_sess_index.wrapping_add(1).max(1);

        let mut sess = SmfSess::new(id, index, imsi_bcd, session_name);
        sess.s8.init();
        log::info!(
            "[{}] session added (id={}, apn={:?})",
            imsi_bcd, id, session_name
        );
        self.mirror.update_session(&sess, &self.config.name);
        self.sess_list.entry(id).or_insert(sess)
    }

    pub fn sess_find(&self, id: u64) -> Option<&SmfSess> {
        self.sess_list.get(&id)
    }

    pub fn sess_find_mut(&mut self, id: u64) -> Option<&mut SmfSess> {
        self.sess_list.get_mut(&id)
    }

    pub fn sess_find_by_imsi(&self, imsi_bcd: &str) -> Option<&SmfSess> {
        self.sess_list.values().find(|s| s.imsi_bcd == imsi_bcd)
    }

    pub fn sess_remove(&mut self, id: u64) -> Option<SmfSess> {
        let sess = self.sess_list.remove(&id)?;
        log::info!("[{}] session removed (id={})", sess.imsi_bcd, id);
        self.mirror.remove_session(&sess);
        Some(sess)
    }

    pub fn sess_count(&self) -> usize {
        self.sess_list.len()
    }

    /// Run one S8 event through a session's state machine.
    ///
    /// A session reaching `Final` is removed.
    pub fn dispatch_s8(
        &mut self,
        sess_id: u64,
        event: &S8Event,
        pfcp: &mut dyn PfcpPath,
        gtp: &mut dyn GtpPath,
    ) -> SmfResult<S8FsmResult> {
        let sess = self
            .sess_list
            .get_mut(&sess_id)
            .ok_or(SmfError::SessionNotFound(sess_id))?;
        let timer = self.timers.get(SmfTimerId::S8T3Response);

        let result = s8_sm::dispatch(sess, event, timer, pfcp, gtp);

        if sess.state() == S8State::Final {
            self.sess_remove(sess_id);
        } else {
            self.mirror.update_session(sess, &self.config.name);
        }
        Ok(result)
    }

    /// Run one Gx message against a session's policy state
    pub fn dispatch_gx(
        &mut self,
        sess_id: u64,
        message: &GxMessage,
        binding: &mut dyn BearerBinding,
    ) -> SmfResult<Option<u32>> {
        let sess = self
            .sess_list
            .get_mut(&sess_id)
            .ok_or(SmfError::SessionNotFound(sess_id))?;
        Ok(gx_handler::handle_gx_message(sess, message, binding, &self.config))
    }

    /// Remove every session
    pub fn fini(&mut self) {
        let ids: Vec<u64> = self.sess_list.keys().copied().collect();
        for id in ids {
            self.sess_remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::tests::MemoryKvStore;
    use crate::mirror::MirrorContext;

    fn context() -> SmfContext {
        let config = SmfConfig::default();
        let mirror = MirrorContext::new(config.mirror.clone(), Box::new(MemoryKvStore::new()));
        SmfContext::new(config, mirror)
    }

    #[test]
    fn test_sess_add_initialises_fsm() {
        let mut ctx = context();
        let sess = ctx.sess_add("001010000000001", Some("internet"));
        assert_eq!(sess.state(), S8State::Operational);
        let id = sess.id;
        assert_eq!(ctx.sess_count(), 1);
        assert!(ctx.sess_find(id).is_some());
        assert!(ctx.sess_find_by_imsi("001010000000001").is_some());
    }

    #[test]
    fn test_sess_remove() {
        let mut ctx = context();
        let id = ctx.sess_add("001010000000002", None).id;
        assert!(ctx.sess_remove(id).is_some());
        assert!(ctx.sess_remove(id).is_none());
        assert_eq!(ctx.sess_count(), 0);
    }

    #[test]
    fn test_fini_removes_all() {
        let mut ctx = context();
        ctx.sess_add("001010000000003", None);
        ctx.sess_add("001010000000004", None);
        ctx.fini();
        assert_eq!(ctx.sess_count(), 0);
    }

    #[test]
    fn test_dispatch_s8_removes_final_session() {
        use crate::s8_build::S8Message;
        use crate::s8_handler::tests::{MockGtpPath, MockPfcpPath};

        let mut ctx = context();
        let id = ctx.sess_add("001010000000005", Some("internet")).id;
        let mut pfcp = MockPfcpPath::default();
        let mut gtp = MockGtpPath::default();

        let req = S8Event::Message {
            xact_id: 1,
            message: S8Message::DeleteSessionRequest,
        };
        ctx.dispatch_s8(id, &req, &mut pfcp, &mut gtp).unwrap();
        assert_eq!(ctx.sess_find(id).unwrap().state(), S8State::WaitDeleteResponse);
        assert_eq!(gtp.started.len(), 1);

        let rsp = S8Event::Message {
            xact_id: 1,
            message: S8Message::DeleteSessionResponse { cause: Some(16) },
        };
        let result = ctx.dispatch_s8(id, &rsp, &mut pfcp, &mut gtp).unwrap();
        assert!(matches!(result, S8FsmResult::Transition(S8State::Final)));
        assert!(ctx.sess_find(id).is_none());

        let err = ctx.dispatch_s8(id, &rsp, &mut pfcp, &mut gtp).unwrap_err();
        assert!(matches!(err, SmfError::SessionNotFound(_)));
    }

    #[test]
    fn test_dispatch_gx_unknown_session() {
        use crate::binding::tests::RecordingBinding;
        use crate::gx_message::GxMessageKind;

        let mut ctx = context();
        let mut binding = RecordingBinding::default();
        let msg = GxMessage::new(GxMessageKind::ReAuth);
        assert!(matches!(
            ctx.dispatch_gx(42, &msg, &mut binding),
            Err(SmfError::SessionNotFound(42))
        ));
        assert!(binding.calls.is_empty());
    }

    #[test]
    fn test_create_default_bearer() {
        let mut sess = SmfSess::new(1, 1, "001010000000001", Some("internet"));
        let bearer = sess
            .create_default_bearer(5, IpAddr::v4(Ipv4Addr::new(10, 0, 0, 2)), 0x10)
            .clone();

        assert_eq!(sess.pfcp.pdrs().len(), 2);
        assert_eq!(sess.pfcp.fars().len(), 2);
        assert_eq!(sess.pfcp.pdr(bearer.ul_pdr).unwrap().far_id, bearer.ul_far);
        assert_eq!(sess.pfcp.pdr(bearer.dl_pdr).unwrap().far_id, bearer.dl_far);
        assert_eq!(
            sess.pfcp.far(bearer.dl_far).unwrap().dst_if,
            DestinationInterface::Access
        );
    }

    #[test]
    fn test_cp_up_data_forwarding_is_idempotent() {
        let mut sess = SmfSess::new(1, 1, "001010000000001", None);
        sess.create_default_bearer(5, IpAddr::v4(Ipv4Addr::new(10, 0, 0, 2)), 0x10);
        sess.create_cp_up_data_forwarding();
        let cp2up = sess.cp2up_pdr;
        sess.create_cp_up_data_forwarding();

        assert_eq!(sess.cp2up_pdr, cp2up);
        assert_eq!(sess.pfcp.pdrs().len(), 4);
        assert_eq!(sess.pfcp.fars().len(), 3);
        let up2cp_pdr = sess.up2cp_pdr.unwrap();
        assert_eq!(sess.pfcp.pdr(up2cp_pdr).unwrap().far_id, sess.up2cp_far.unwrap());
    }

    #[test]
    #[should_panic(expected = "default bearer")]
    fn test_cp_up_data_forwarding_without_bearer() {
        let mut sess = SmfSess::new(1, 1, "001010000000001", None);
        sess.create_cp_up_data_forwarding();
    }

    #[test]
    fn test_is_session_name_case_insensitive() {
        let sess = SmfSess::new(1, 1, "001010000000001", Some("IMS"));
        assert!(sess.is_session_name("ims"));
        assert!(!sess.is_session_name("internet"));
        let unnamed = SmfSess::new(2, 2, "001010000000002", None);
        assert!(!unnamed.is_session_name("ims"));
    }

    #[test]
    fn test_find_gtpu_resource() {
        let node = PfcpNode {
            id: 1,
            gtpu_resources: vec![
                GtpuResource {
                    dnn: Some("internet".into()),
                    source_interface: Some(SourceInterface::Access),
                    addr: Some(Ipv4Addr::new(10, 1, 0, 1)),
                    ..Default::default()
                },
                GtpuResource {
                    addr: Some(Ipv4Addr::new(10, 9, 0, 1)),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let hit = node
            .find_gtpu_resource(Some("internet"), SourceInterface::Access)
            .unwrap();
        assert_eq!(hit.addr, Some(Ipv4Addr::new(10, 1, 0, 1)));

        // wildcard resource picks up everything else
        let other = node
            .find_gtpu_resource(Some("ims"), SourceInterface::Access)
            .unwrap();
        assert_eq!(other.addr, Some(Ipv4Addr::new(10, 9, 0, 1)));
    }
}
