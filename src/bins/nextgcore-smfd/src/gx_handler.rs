//! SMF Gx Message Handler
//!
//! Compiles Gx policy decisions (3GPP TS 29.212) into the session's
//! PDR/FAR/QER/URR rule graph.
//!
//! Handlers return the Diameter Result-Code to report back to the PCRF.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::binding::BearerBinding;
use crate::config::SmfConfig;
use crate::context::{PccRule, Qos, SessionAmbr, SmfSess};
use crate::gx_message::{result_code, GxMessage, GxMessageKind, GxSessionData};
use crate::pfcp_context::{
    gtpu_index_to_teid, ApplyAction, Bitrate, FTeid, MeasurementMethod, OuterHeaderCreation, PdrId,
    ReportingTriggers, SdfFilter, UeIpAddress, UrrId, VolumeThreshold,
    OGS_PFCP_DEFAULT_CHOOSE_ID,
};

/// Router-solicitation flow redirected from the UP function to the SMF
pub const UP2CP_RS_FLOW_DESCRIPTION: &str = "permit out 58 from ff02::2/128 to assigned";

// ============================================================================
// Dispatch
// ============================================================================

/// Route a Gx message to its handler.
///
/// Returns the Result-Code to answer with, or None when the message kind is
/// not consumed here.
pub fn handle_gx_message(
    sess: &mut SmfSess,
    message: &GxMessage,
    binding: &mut dyn BearerBinding,
    config: &SmfConfig,
) -> Option<u32> {
    match message.kind {
        GxMessageKind::CcaInitial => Some(handle_cca_initial_request(sess, message, config)),
        GxMessageKind::CcaTermination => Some(handle_cca_termination_request(sess, message)),
        GxMessageKind::ReAuth => {
            handle_re_auth_request(sess, message, binding);
            Some(result_code::DIAMETER_SUCCESS)
        }
        GxMessageKind::CcaUpdate => {
            log::debug!("[{}] Gx CCA-Update ignored", sess.imsi_bcd);
            None
        }
    }
}

// ============================================================================
// CCA-Initial
// ============================================================================

/// Install the policy of a CCA-Initial on the session's default bearer.
///
/// # Panics
///
/// If the session has no default bearer, UE address, peer S5U address or
/// user-plane node. These are set up at session establishment.
pub fn handle_cca_initial_request(
    sess: &mut SmfSess,
    message: &GxMessage,
    config: &SmfConfig,
) -> u32 {
    log::info!(
        "[{}] Gx CCA-Initial: installing {} PCC rules",
        sess.imsi_bcd,
        message.session_data.pcc_rules.len()
    );
    log::debug!(
        "    SGW_S5C_TEID[0x{:x}] PGW_S5C_TEID[0x{:x}]",
        sess.sgw_s5c_teid, sess.smf_n4_teid
    );

    let data = &message.session_data;
    let exempt = sess.is_session_name(&config.ims_dnn);

    let mut rating_group_urrs: Vec<(u32, UrrId)> = Vec::new();
    if !exempt {
        if !message.is_success() {
            log::error!(
                "[{}] Gx CCA-I failed with result code {}",
                sess.imsi_bcd, message.result_code
            );
            return message
                .err
                .unwrap_or(result_code::DIAMETER_AUTHENTICATION_REJECTED);
        }

        if let Some(rule) = data
            .pcc_rules
            .iter()
            .find(|rule| rule.flows.len() > config.max_num_of_flow)
        {
            log::error!(
                "[{}] Too many flows in PCC rule [{}] ({} > {})",
                sess.imsi_bcd,
                rule.name,
                rule.flows.len(),
                config.max_num_of_flow
            );
            return result_code::DIAMETER_UNABLE_TO_COMPLY;
        }

        rating_group_urrs = install_rating_group_urrs(sess, &data.pcc_rules, config);
    }

    store_pcc_rules(sess, &data.pcc_rules);

    let (ul_pdr, dl_pdr) = configure_default_bearer(sess, config);
    allocate_ul_f_teid(sess);

    for (rating_group, urr_id) in &rating_group_urrs {
        log::info!(
            "    Setting up URR[{}] for Rating Group[{}]",
            urr_id, rating_group
        );
        sess.pfcp.pdr_associate_urr(ul_pdr, *urr_id);
        sess.pfcp.pdr_associate_urr(dl_pdr, *urr_id);
    }
    apply_policy_flows(sess, ul_pdr, dl_pdr);

    update_session_ambr_qos(sess, data);
    install_ambr_qer(sess, ul_pdr, dl_pdr);

    result_code::DIAMETER_SUCCESS
}

/// Distinct non-zero rating groups in first-seen order
pub fn collect_rating_groups(rules: &[PccRule]) -> Vec<u32> {
    let mut groups: Vec<u32> = Vec::new();
    for rule in rules {
        if rule.rating_group != 0 && !groups.contains(&rule.rating_group) {
            groups.push(rule.rating_group);
        }
    }
    groups
}

/// Make exactly one URR exist per rating group of `rules`, dropping URRs of
/// groups no longer present.
fn install_rating_group_urrs(
    sess: &mut SmfSess,
    rules: &[PccRule],
    config: &SmfConfig,
) -> Vec<(u32, UrrId)> {
    let groups = collect_rating_groups(rules);

    let stale: Vec<UrrId> = sess
        .pfcp
        .urrs()
        .iter()
        .filter(|urr| !groups.contains(&urr.rating_group))
        .map(|urr| urr.id)
        .collect();
    for urr_id in stale {
        if let Some(urr) = sess.pfcp.urr_remove(urr_id) {
            log::info!(
                "    Removed URR[{}] for Rating Group[{}]",
                urr.id, urr.rating_group
            );
        }
    }

    let mut installed = Vec::with_capacity(groups.len());
    for rating_group in groups {
        let num_rules = rules
            .iter()
            .filter(|r| r.rating_group == rating_group)
            .count();

        let urr_id = match sess.pfcp.urr_find_by_rating_group(rating_group) {
            Some(id) => id,
            None => {
                let id = sess.pfcp.urr_add(rating_group);
                log::info!(
                    "    Created URR[{}] for Rating Group[{}] with {} rules",
                    id, rating_group, num_rules
                );
                id
            }
        };

        if let Some(urr) = sess.pfcp.urr_mut(urr_id) {
            urr.meas_method = MeasurementMethod {
                volum: true,
                durat: true,
                event: false,
            };
            urr.vol_threshold = VolumeThreshold {
                tovol: true,
                total_volume: config.urr.volume_threshold,
                ..Default::default()
            };
            urr.time_threshold = config.urr.time_threshold;
            urr.rep_triggers = ReportingTriggers {
                volth: true,
                timth: true,
                ..Default::default()
            };
        }
        installed.push((rating_group, urr_id));
    }
    installed
}

fn store_pcc_rules(sess: &mut SmfSess, rules: &[PccRule]) {
    sess.pcc_rules = rules.to_vec();
    for (i, rule) in sess.pcc_rules.iter().enumerate() {
        log::debug!(
            "PCC Rule[{}] Name[{}] Rating Group[{}] Flow Status[{}]",
            i, rule.name, rule.rating_group, rule.flow_status
        );
        for (j, flow) in rule.flows.iter().enumerate() {
            log::debug!(
                "  - Flow[{}]: {} (dir:{:?})",
                j, flow.description, flow.direction
            );
        }
    }
}

/// Forwarding, UE address and UP->CP redirect on the default bearer.
/// Returns its (UL, DL) PDRs.
fn configure_default_bearer(sess: &mut SmfSess, config: &SmfConfig) -> (PdrId, PdrId) {
    let bearer = match &sess.default_bearer {
        Some(bearer) => bearer.clone(),
        None => panic!("[{}] no default bearer", sess.imsi_bcd),
    };
    sess.create_cp_up_data_forwarding();

    let (Some(up2cp_pdr), Some(up2cp_far)) = (sess.up2cp_pdr, sess.up2cp_far) else {
        panic!("[{}] CP/UP forwarding rules missing", sess.imsi_bcd);
    };
    assert!(
        sess.pfcp.pdr(bearer.ul_pdr).is_some() && sess.pfcp.pdr(bearer.dl_pdr).is_some(),
        "[{}] default bearer PDRs missing",
        sess.imsi_bcd
    );

    let dl_ohc = OuterHeaderCreation::from_ip(
        bearer.sgw_s5u_ip.ipv4,
        bearer.sgw_s5u_ip.ipv6,
        bearer.sgw_s5u_teid,
    );
    let Some(dl_ohc) = dl_ohc else {
        panic!("[{}] no SGW-S5U address on default bearer", sess.imsi_bcd);
    };
    match sess.pfcp.far_mut(bearer.dl_far) {
        Some(dl_far) => {
            dl_far.apply_action = ApplyAction::forward();
            dl_far.outer_header_creation = Some(dl_ohc);
        }
        None => panic!("[{}] default bearer DL FAR missing", sess.imsi_bcd),
    }
    log::info!("    Configured DL FAR with FORWARD action");

    let ue_ip = ue_ip_address(sess);
    if let Some(dl_pdr) = sess.pfcp.pdr_mut(bearer.dl_pdr) {
        dl_pdr.ue_ip_addr = Some(UeIpAddress { sd: true, ..ue_ip });
    }
    if let Some(ul_pdr) = sess.pfcp.pdr_mut(bearer.ul_pdr) {
        ul_pdr.ue_ip_addr = Some(ue_ip);
    }

    if let Some(pdr) = sess.pfcp.pdr_mut(up2cp_pdr) {
        if !pdr
            .flows
            .iter()
            .any(|f| f.description == UP2CP_RS_FLOW_DESCRIPTION)
        {
            pdr.flows
                .push(SdfFilter::flow_description(UP2CP_RS_FLOW_DESCRIPTION));
        }
    }

    let Some(up2cp_ohc) =
        OuterHeaderCreation::from_ip(config.gtpu_addr, config.gtpu_addr6, sess.index)
    else {
        panic!("SMF GTP-U address not configured");
    };
    if let Some(far) = sess.pfcp.far_mut(up2cp_far) {
        far.apply_action = ApplyAction::forward();
        far.outer_header_creation = Some(up2cp_ohc);
    }
    log::info!("    Configured UP2CP FAR with FORWARD action");

    (bearer.ul_pdr, bearer.dl_pdr)
}

fn ue_ip_address(sess: &SmfSess) -> UeIpAddress {
    let addr6 = sess.ipv6_prefix.map(|(_, prefix)| prefix);
    assert!(
        sess.ipv4_addr.is_some() || addr6.is_some(),
        "[{}] no UE IP address allocated",
        sess.imsi_bcd
    );
    UeIpAddress {
        addr: sess.ipv4_addr,
        addr6,
        sd: false,
    }
}

/// F-TEID of the UL, CP->UP and UP->CP PDRs
fn allocate_ul_f_teid(sess: &mut SmfSess) {
    let Some(node) = sess.pfcp_node.clone() else {
        panic!("[{}] no PFCP node associated", sess.imsi_bcd);
    };
    let (Some(bearer), Some(cp2up_pdr), Some(up2cp_pdr)) =
        (sess.default_bearer.clone(), sess.cp2up_pdr, sess.up2cp_pdr)
    else {
        panic!("[{}] default bearer forwarding rules missing", sess.imsi_bcd);
    };
    let Some(ul) = sess.pfcp.pdr(bearer.ul_pdr).cloned() else {
        panic!("[{}] default bearer UL PDR missing", sess.imsi_bcd);
    };

    if node.up_function_features.ftup {
        set_f_teid(sess, bearer.ul_pdr, FTeid::choose(Some(OGS_PFCP_DEFAULT_CHOOSE_ID)));
        set_f_teid(sess, cp2up_pdr, FTeid::choose(None));
        set_f_teid(sess, up2cp_pdr, FTeid::choose(Some(OGS_PFCP_DEFAULT_CHOOSE_ID)));
        return;
    }

    let (addr, addr6, teid) =
        match node.find_gtpu_resource(sess.session_name.as_deref(), ul.src_if) {
            Some(resource) => {
                let teid = if resource.teidri != 0 {
                    gtpu_index_to_teid(ul.teid, resource.teidri, resource.teid_range)
                } else {
                    ul.teid
                };
                (resource.addr, resource.addr6, teid)
            }
            None => {
                let (addr, addr6): (Option<Ipv4Addr>, Option<Ipv6Addr>) =
                    match node.addr_list.first() {
                        Some(std::net::IpAddr::V4(a)) => (Some(*a), None),
                        Some(std::net::IpAddr::V6(a)) => (None, Some(*a)),
                        None => panic!("[{}] PFCP node has no address", sess.imsi_bcd),
                    };
                (addr, addr6, ul.teid)
            }
        };

    if let Some(bearer) = sess.default_bearer.as_mut() {
        bearer.pgw_s5u_addr = addr;
        bearer.pgw_s5u_addr6 = addr6;
        bearer.pgw_s5u_teid = teid;
    }
    log::debug!(
        "    PGW_S5U_TEID[0x{:x}] addr[{:?}] addr6[{:?}]",
        teid, addr, addr6
    );

    let cp2up_teid = sess.pfcp.pdr(cp2up_pdr).map_or(0, |p| p.teid);
    set_f_teid(sess, bearer.ul_pdr, FTeid::with_addr(addr, addr6, teid));
    set_f_teid(sess, cp2up_pdr, FTeid::with_addr(addr, addr6, cp2up_teid));
    set_f_teid(sess, up2cp_pdr, FTeid::with_addr(addr, addr6, teid));
}

fn set_f_teid(sess: &mut SmfSess, pdr_id: PdrId, f_teid: FTeid) {
    if let Some(pdr) = sess.pfcp.pdr_mut(pdr_id) {
        pdr.f_teid = Some(f_teid);
    }
}

/// Replace the policy flows of the default PDRs with those of the stored rules
fn apply_policy_flows(sess: &mut SmfSess, ul_pdr: PdrId, dl_pdr: PdrId) {
    let mut ul_flows = Vec::new();
    let mut dl_flows = Vec::new();
    for rule in &sess.pcc_rules {
        for flow in &rule.flows {
            if flow.direction.is_uplink() {
                log::debug!("        * UL Flow: {}", flow.description);
                ul_flows.push(SdfFilter::flow_description(flow.description.as_str()));
            }
            if flow.direction.is_downlink() {
                log::debug!("        * DL Flow: {}", flow.description);
                dl_flows.push(SdfFilter::flow_description(flow.description.as_str()));
            }
        }
    }
    if let Some(pdr) = sess.pfcp.pdr_mut(ul_pdr) {
        pdr.flows = ul_flows;
    }
    if let Some(pdr) = sess.pfcp.pdr_mut(dl_pdr) {
        pdr.flows = dl_flows;
    }
}

/// Whether an incoming AMBR differs from the stored one at kbps granularity
pub fn ambr_changed(stored: &SessionAmbr, incoming: &SessionAmbr) -> bool {
    (incoming.uplink != 0 && stored.uplink / 1000 != incoming.uplink / 1000)
        || (incoming.downlink != 0 && stored.downlink / 1000 != incoming.downlink / 1000)
}

/// Whether an incoming QCI/ARP differs from the stored one
pub fn qos_changed(stored: &Qos, incoming: &Qos) -> bool {
    (incoming.index != 0 && stored.index != incoming.index)
        || (incoming.arp.priority_level != 0
            && stored.arp.priority_level != incoming.arp.priority_level)
        || stored.arp.pre_emption_capability != incoming.arp.pre_emption_capability
        || stored.arp.pre_emption_vulnerability != incoming.arp.pre_emption_vulnerability
}

fn update_session_ambr_qos(sess: &mut SmfSess, data: &GxSessionData) {
    sess.gtp.create_session_response_apn_ambr = false;
    if ambr_changed(&sess.session_ambr, &data.ambr) {
        sess.session_ambr = data.ambr;
        sess.gtp.create_session_response_apn_ambr = true;
        log::debug!(
            "[{}] APN-AMBR UL[{}] DL[{}]",
            sess.imsi_bcd, data.ambr.uplink, data.ambr.downlink
        );
    }

    sess.gtp.create_session_response_bearer_qos = false;
    if qos_changed(&sess.session_qos, &data.qos) {
        sess.session_qos.index = data.qos.index;
        sess.session_qos.arp = data.qos.arp;
        sess.gtp.create_session_response_bearer_qos = true;
        log::debug!(
            "[{}] Bearer QoS QCI[{}] ARP[{}]",
            sess.imsi_bcd, data.qos.index, data.qos.arp.priority_level
        );
    }
}

/// One shared QER limiting both default PDRs to the session AMBR
fn install_ambr_qer(sess: &mut SmfSess, ul_pdr: PdrId, dl_pdr: PdrId) {
    let ambr = sess.session_ambr;
    if ambr.is_zero() {
        if let Some(qer_id) = sess.ambr_qer.take() {
            sess.pfcp.qer_remove(qer_id);
        }
        return;
    }

    let mbr = Bitrate {
        uplink: ambr.uplink,
        downlink: ambr.downlink,
    };
    let existing = sess.ambr_qer.filter(|id| sess.pfcp.qer(*id).is_some());
    let qer_id = match existing {
        Some(id) => {
            if let Some(qer) = sess.pfcp.qer_mut(id) {
                qer.mbr = mbr;
            }
            id
        }
        None => {
            let id = sess.pfcp.qer_add(mbr);
            sess.ambr_qer = Some(id);
            id
        }
    };
    sess.pfcp.pdr_associate_qer(dl_pdr, qer_id);
    sess.pfcp.pdr_associate_qer(ul_pdr, qer_id);
}

// ============================================================================
// CCA-Termination / RAR
// ============================================================================

/// Acknowledge a CCA-Termination
pub fn handle_cca_termination_request(sess: &mut SmfSess, _message: &GxMessage) -> u32 {
    log::info!("[{}] Gx CCA-Termination acknowledged", sess.imsi_bcd);
    log::debug!(
        "    SGW_S5C_TEID[0x{:x}] SMF_N4_TEID[0x{:x}]",
        sess.sgw_s5c_teid, sess.smf_n4_teid
    );
    result_code::DIAMETER_SUCCESS
}

/// Replace the stored PCC rules and re-bind them onto bearers
pub fn handle_re_auth_request(
    sess: &mut SmfSess,
    message: &GxMessage,
    binding: &mut dyn BearerBinding,
) {
    store_pcc_rules(sess, &message.session_data.pcc_rules);
    binding.bearer_binding(sess);
}
