//! On-wire LQSR frame ↔ in-memory [`SRPacket`] codec (spec §4.1).
//!
//! TLV option layout is grounded in `strata_transport::wire`'s length-
//! prefixed parsing style (zero-copy `Bytes`/`BytesMut` slicing, explicit
//! `MIN/MAX` size constants) generalized from one fixed header shape to an
//! open set of typed options.

use crate::error::{MclError, Result};
use crate::types::{LQSRIf, LinkMetric, MetricType, VirtualAddress};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const LQSR_CODE: u8 = 0x4c;
pub const LQSR_MAC_LENGTH: usize = 16;
pub const LQSR_IV_LENGTH: usize = 16;
/// Fixed portion before the option list: Code(1) + MAC(16) + IV(16) + HeaderLength(2).
pub const FIXED_HEADER_LEN: usize = 1 + LQSR_MAC_LENGTH + LQSR_IV_LENGTH + 2;
/// Ethernet header: dest(6) + src(6) + ethertype(2).
pub const ETHER_HEADER_LEN: usize = 14;
pub const ETYPE_MSFT: u16 = 0x8999;

/// Longest source route / route request this implementation will build or
/// accept, per spec §9 ("bound the depth to MAX_SR_LEN").
pub const MAX_SR_LEN: usize = 7;

pub(crate) const HOP_LEN: usize = 6 + 1 + 1 + 4; // addr + in_if + out_if + metric

/// A black-box keyed MAC, supplied by the host. Cryptographic primitives are
/// explicitly out of scope (spec §1) — production code wires in a real
/// HMAC; tests use [`ToyMac`].
pub trait Mac: Send + Sync {
    fn compute(&self, key: &[u8; LQSR_MAC_LENGTH], data: &[u8]) -> [u8; LQSR_MAC_LENGTH];
}

/// Deterministic, non-cryptographic stand-in for tests and for adapters that
/// disable crypto (`Crypto = false`): per spec §6, when crypto is off the
/// "MAC" is simply the node's per-adapter MAC key, so verification still
/// round-trips.
#[derive(Debug, Default)]
pub struct ToyMac;

impl Mac for ToyMac {
    fn compute(&self, key: &[u8; LQSR_MAC_LENGTH], data: &[u8]) -> [u8; LQSR_MAC_LENGTH] {
        let mut out = *key;
        let mut acc: u64 = 0xcbf29ce484222325;
        for (i, &b) in data.iter().enumerate() {
            acc ^= b as u64;
            acc = acc.wrapping_mul(0x100000001b3);
            out[i % LQSR_MAC_LENGTH] ^= (acc >> ((i % 8) * 8)) as u8;
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionType {
    Pad1 = 0,
    PadN = 1,
    Request = 2,
    Reply = 3,
    Error = 4,
    AckReq = 5,
    Ack = 6,
    SourceRt = 7,
    InfoReq = 8,
    Info = 9,
    Probe = 10,
    ProbeReply = 11,
    LinkInfo = 12,
}

impl OptionType {
    fn from_wire(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Pad1,
            1 => Self::PadN,
            2 => Self::Request,
            3 => Self::Reply,
            4 => Self::Error,
            5 => Self::AckReq,
            6 => Self::Ack,
            7 => Self::SourceRt,
            8 => Self::InfoReq,
            9 => Self::Info,
            10 => Self::Probe,
            11 => Self::ProbeReply,
            12 => Self::LinkInfo,
            _ => return None,
        })
    }
}

/// One `(addr, in_if, out_if, metric)` hop, as carried in Route Request,
/// Route Reply, Source Route, and Link Info options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    pub addr: VirtualAddress,
    pub in_if: LQSRIf,
    pub out_if: LQSRIf,
    pub metric: LinkMetric,
}

impl Hop {
    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.addr.0);
        buf.put_u8(self.in_if);
        buf.put_u8(self.out_if);
        buf.put_u32(self.metric.0);
    }

    fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < HOP_LEN {
            return None;
        }
        let mut addr = [0u8; 6];
        buf.copy_to_slice(&mut addr);
        let in_if = buf.get_u8();
        let out_if = buf.get_u8();
        let metric = LinkMetric(buf.get_u32());
        Some(Hop {
            addr: VirtualAddress::new(addr),
            in_if,
            out_if,
            metric,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    pub identifier: u32,
    /// hops[0] is the originator (spec: "originator is hop[0]").
    pub hops: Vec<Hop>,
}

impl RouteRequest {
    pub fn originator(&self) -> VirtualAddress {
        self.hops[0].addr
    }

    pub fn target(&self) -> VirtualAddress {
        // Last field of the request is the addressed target when used to
        // recover dest in absence of a Source Route (spec §4.1).
        self.hops.last().map(|h| h.addr).unwrap_or(self.hops[0].addr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReply {
    pub hops: Vec<Hop>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteError {
    pub src: VirtualAddress,
    pub dst: VirtualAddress,
    pub unreachable: VirtualAddress,
    pub in_if: LQSRIf,
    pub out_if: LQSRIf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRequest {
    pub id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoute {
    pub hops: Vec<Hop>,
    pub segments_left: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InfoRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoReply {
    pub recv_bad_mac: u32,
    pub forward_drop: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbePayload {
    Rtt { send_time_ticks: u64 },
    PktPair { small_send_ticks: u64, large_send_ticks: u64 },
    Etx { receive_counts: Vec<(VirtualAddress, u32)> },
}

impl ProbePayload {
    fn metric_type(&self) -> MetricType {
        match self {
            ProbePayload::Rtt { .. } => MetricType::Rtt,
            ProbePayload::PktPair { .. } => MetricType::PktPair,
            ProbePayload::Etx { .. } => MetricType::Etx,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub seq: u32,
    pub payload: ProbePayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReply {
    pub seq: u32,
    pub payload: ProbePayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfoEntry {
    pub peer: VirtualAddress,
    pub in_if: LQSRIf,
    pub out_if: LQSRIf,
    pub metric: LinkMetric,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub entries: Vec<LinkInfoEntry>,
}

/// In-memory representation of one LQSR frame (spec §3, "SRPacket").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SRPacket {
    pub req: Option<RouteRequest>,
    pub rep: Vec<RouteReply>,
    pub err: Vec<RouteError>,
    pub ack_req: Option<AckRequest>,
    pub ack: Vec<Ack>,
    pub source_route: Option<SourceRoute>,
    pub info_req: Option<InfoRequest>,
    pub info_rep: Vec<InfoReply>,
    pub probe: Option<Probe>,
    pub probe_reply: Option<ProbeReply>,
    pub link_info: Vec<LinkInfo>,

    pub source: VirtualAddress,
    pub dest: VirtualAddress,
    pub ether_source: VirtualAddress,
    pub ether_dest: VirtualAddress,
    pub iv: [u8; LQSR_IV_LENGTH],
    pub payload: Bytes,
}

impl SRPacket {
    /// Invariant from spec §3: an Ack Request implies a Source Route is
    /// also present (so the ack has somewhere to travel back through).
    pub fn check_invariants(&self) -> Result<()> {
        if self.ack_req.is_some() && self.source_route.is_none() {
            return Err(MclError::InvalidPacket("ack_req without source_route"));
        }
        Ok(())
    }
}

fn put_option(buf: &mut BytesMut, ty: OptionType, body: impl FnOnce(&mut BytesMut)) -> Result<()> {
    let start = buf.len();
    buf.put_u8(ty as u8);
    buf.put_u8(0); // placeholder length
    let body_start = buf.len();
    body(buf);
    let len = buf.len() - body_start;
    if len > u8::MAX as usize {
        return Err(MclError::InvalidPacket("option body exceeds 255 bytes"));
    }
    buf[start + 1] = len as u8;
    Ok(())
}

/// Assembles an `SRPacket` into a contiguous on-wire header + payload,
/// computing the MAC last (spec §4.1: "computes MAC after filling all other
/// fields").
pub fn emit(pkt: &SRPacket, mac_key: &[u8; LQSR_MAC_LENGTH], mac: &dyn Mac) -> Result<Bytes> {
    pkt.check_invariants()?;

    let mut opts = BytesMut::new();

    if let Some(req) = &pkt.req {
        if req.hops.is_empty() {
            return Err(MclError::InvalidPacket("route request needs >=1 hop"));
        }
        put_option(&mut opts, OptionType::Request, |b| {
            b.put_u32(req.identifier);
            for h in &req.hops {
                h.encode(b);
            }
        })?;
    }
    for rep in &pkt.rep {
        if rep.hops.len() < 2 {
            return Err(MclError::InvalidPacket("route reply needs >=2 hops"));
        }
        put_option(&mut opts, OptionType::Reply, |b| {
            for h in &rep.hops {
                h.encode(b);
            }
        })?;
    }
    for err in &pkt.err {
        put_option(&mut opts, OptionType::Error, |b| {
            b.put_slice(&err.src.0);
            b.put_slice(&err.dst.0);
            b.put_slice(&err.unreachable.0);
            b.put_u8(err.in_if);
            b.put_u8(err.out_if);
        })?;
    }
    if let Some(ackreq) = &pkt.ack_req {
        put_option(&mut opts, OptionType::AckReq, |b| b.put_u16(ackreq.id))?;
    }
    for ack in &pkt.ack {
        put_option(&mut opts, OptionType::Ack, |b| b.put_u16(ack.id))?;
    }
    if let Some(sr) = &pkt.source_route {
        if sr.hops.len() < 2 {
            return Err(MclError::InvalidPacket("source route needs >=2 hops"));
        }
        if sr.segments_left == 0 || sr.segments_left as usize >= sr.hops.len() {
            return Err(MclError::InvalidPacket(
                "source route segments_left out of range",
            ));
        }
        put_option(&mut opts, OptionType::SourceRt, |b| {
            b.put_u8(sr.segments_left);
            b.put_u8(sr.hops.len() as u8);
            for h in &sr.hops {
                h.encode(b);
            }
        })?;
    }
    if pkt.info_req.is_some() {
        put_option(&mut opts, OptionType::InfoReq, |_| {})?;
    }
    for rep in &pkt.info_rep {
        put_option(&mut opts, OptionType::Info, |b| {
            b.put_u32(rep.recv_bad_mac);
            b.put_u32(rep.forward_drop);
        })?;
    }
    if let Some(probe) = &pkt.probe {
        put_option(&mut opts, OptionType::Probe, |b| encode_probe_body(b, probe.seq, &probe.payload))?;
    }
    if let Some(reply) = &pkt.probe_reply {
        put_option(&mut opts, OptionType::ProbeReply, |b| {
            encode_probe_body(b, reply.seq, &reply.payload)
        })?;
    }
    for li in &pkt.link_info {
        if li.entries.is_empty() {
            return Err(MclError::InvalidPacket("link info needs >=1 entry"));
        }
        put_option(&mut opts, OptionType::LinkInfo, |b| {
            for e in &li.entries {
                b.put_slice(&e.peer.0);
                b.put_u8(e.in_if);
                b.put_u8(e.out_if);
                b.put_u32(e.metric.0);
            }
        })?;
    }

    if pkt.req.is_none()
        && pkt.source_route.is_none()
        && pkt.ack.is_empty()
        && pkt.probe.is_none()
        && pkt.probe_reply.is_none()
    {
        return Err(MclError::InvalidPacket(
            "packet carries none of request/source-route/ack/probe/probe-reply",
        ));
    }

    let header_len = opts.len();
    if header_len > u16::MAX as usize {
        return Err(MclError::InvalidPacket("header too long"));
    }

    let mut body = BytesMut::with_capacity(LQSR_IV_LENGTH + 2 + header_len + pkt.payload.len());
    body.put_slice(&pkt.iv);
    body.put_u16(header_len as u16);
    body.put_slice(&opts);
    body.put_slice(&pkt.payload);

    let computed_mac = mac.compute(mac_key, &body);

    let mut out = BytesMut::with_capacity(1 + LQSR_MAC_LENGTH + body.len());
    out.put_u8(LQSR_CODE);
    out.put_slice(&computed_mac);
    out.put_slice(&body);
    Ok(out.freeze())
}

fn encode_probe_body(b: &mut BytesMut, seq: u32, payload: &ProbePayload) {
    b.put_u8(payload.metric_type().to_wire());
    b.put_u32(seq);
    match payload {
        ProbePayload::Rtt { send_time_ticks } => b.put_u64(*send_time_ticks),
        ProbePayload::PktPair {
            small_send_ticks,
            large_send_ticks,
        } => {
            b.put_u64(*small_send_ticks);
            b.put_u64(*large_send_ticks);
        }
        ProbePayload::Etx { receive_counts } => {
            b.put_u8(receive_counts.len() as u8);
            for (addr, count) in receive_counts {
                b.put_slice(&addr.0);
                b.put_u32(*count);
            }
        }
    }
}

fn decode_probe_body(mut data: &[u8]) -> Result<(u32, ProbePayload)> {
    if data.len() < 5 {
        return Err(MclError::InvalidPacket("probe body too short"));
    }
    let metric_type = MetricType::from_wire(data.get_u8())
        .ok_or(MclError::InvalidPacket("unknown probe metric type"))?;
    let seq = data.get_u32();
    let payload = match metric_type {
        MetricType::Rtt => {
            if data.remaining() < 8 {
                return Err(MclError::InvalidPacket("rtt probe tail too short"));
            }
            ProbePayload::Rtt {
                send_time_ticks: data.get_u64(),
            }
        }
        MetricType::PktPair => {
            if data.remaining() < 16 {
                return Err(MclError::InvalidPacket("pktpair probe tail too short"));
            }
            ProbePayload::PktPair {
                small_send_ticks: data.get_u64(),
                large_send_ticks: data.get_u64(),
            }
        }
        MetricType::Etx => {
            if data.remaining() < 1 {
                return Err(MclError::InvalidPacket("etx probe tail too short"));
            }
            let n = data.get_u8() as usize;
            if data.remaining() < n * 10 {
                return Err(MclError::InvalidPacket("etx probe entries truncated"));
            }
            let mut receive_counts = Vec::with_capacity(n);
            for _ in 0..n {
                let mut addr = [0u8; 6];
                data.copy_to_slice(&mut addr);
                let count = data.get_u32();
                receive_counts.push((VirtualAddress::new(addr), count));
            }
            ProbePayload::Etx { receive_counts }
        }
        MetricType::Hop | MetricType::Wcett => {
            return Err(MclError::InvalidPacket(
                "probe declared an unsupported metric type",
            ))
        }
    };
    Ok((seq, payload))
}

/// Parses a contiguous LQSR header (starting at the `Code` byte) followed by
/// its opaque payload into an [`SRPacket`] (spec §4.1).
pub fn parse(mut frame: Bytes, mac_key: &[u8; LQSR_MAC_LENGTH], mac: &dyn Mac) -> Result<SRPacket> {
    if frame.len() < 1 + LQSR_MAC_LENGTH + LQSR_IV_LENGTH + 2 {
        return Err(MclError::InvalidPacket("frame shorter than fixed header"));
    }
    let code = frame.get_u8();
    if code != LQSR_CODE {
        return Err(MclError::InvalidPacket("bad Code byte"));
    }
    let mut received_mac = [0u8; LQSR_MAC_LENGTH];
    frame.copy_to_slice(&mut received_mac);

    // Everything from here on (IV, HeaderLength, options, payload) is what
    // the MAC covers.
    let body = frame.clone();
    let computed_mac = mac.compute(mac_key, &body);
    if computed_mac != received_mac {
        return Err(MclError::InvalidPacket("MAC mismatch"));
    }

    let mut iv = [0u8; LQSR_IV_LENGTH];
    frame.copy_to_slice(&mut iv);
    if frame.remaining() < 2 {
        return Err(MclError::InvalidPacket("missing header length"));
    }
    let header_len = frame.get_u16() as usize;
    if frame.remaining() < header_len {
        return Err(MclError::InvalidPacket("header length exceeds frame"));
    }

    let mut opts = frame.split_to(header_len);
    let payload = frame;

    let mut pkt = SRPacket {
        iv,
        payload,
        ..Default::default()
    };

    let mut consumed = 0usize;
    while opts.has_remaining() {
        let ty_byte = opts.get_u8();
        consumed += 1;
        if ty_byte == OptionType::Pad1 as u8 {
            continue;
        }
        if !opts.has_remaining() {
            return Err(MclError::InvalidPacket("option truncated before length"));
        }
        let len = opts.get_u8() as usize;
        consumed += 1;
        if opts.remaining() < len {
            return Err(MclError::InvalidPacket("option body truncated"));
        }
        let mut data = opts.split_to(len);
        consumed += len;
        let ty = OptionType::from_wire(ty_byte)
            .ok_or(MclError::InvalidPacket("unknown option type"))?;
        parse_one_option(ty, &mut data, &mut pkt)?;
    }
    if consumed != header_len {
        return Err(MclError::InvalidPacket(
            "option TLV lengths don't sum to declared header length",
        ));
    }

    if pkt.req.is_none()
        && pkt.source_route.is_none()
        && pkt.ack.is_empty()
        && pkt.probe.is_none()
        && pkt.probe_reply.is_none()
    {
        return Err(MclError::InvalidPacket(
            "packet carries none of request/source-route/ack/probe/probe-reply",
        ));
    }

    pkt.check_invariants()?;

    if let Some(sr) = &pkt.source_route {
        pkt.source = sr.hops[0].addr;
        pkt.dest = sr.hops[sr.hops.len() - 1].addr;
    } else if let Some(req) = &pkt.req {
        pkt.source = req.originator();
        pkt.dest = req.target();
    } else {
        // Ack/Probe-only packets: spec says both are zero in this case.
        pkt.source = VirtualAddress::ZERO;
        pkt.dest = VirtualAddress::ZERO;
    }

    Ok(pkt)
}

fn parse_one_option(ty: OptionType, data: &mut Bytes, pkt: &mut SRPacket) -> Result<()> {
    match ty {
        OptionType::Pad1 | OptionType::PadN => {}
        OptionType::Request => {
            if data.remaining() < 4 + HOP_LEN {
                return Err(MclError::InvalidPacket("route request too short"));
            }
            if pkt.req.is_some() {
                return Err(MclError::InvalidPacket("duplicate route request"));
            }
            let identifier = data.get_u32();
            let mut hops = Vec::new();
            while data.has_remaining() {
                hops.push(Hop::decode(data).ok_or(MclError::InvalidPacket("bad hop in request"))?);
            }
            if hops.is_empty() {
                return Err(MclError::InvalidPacket("route request needs >=1 hop"));
            }
            pkt.req = Some(RouteRequest { identifier, hops });
        }
        OptionType::Reply => {
            let mut hops = Vec::new();
            while data.has_remaining() {
                hops.push(Hop::decode(data).ok_or(MclError::InvalidPacket("bad hop in reply"))?);
            }
            if hops.len() < 2 {
                return Err(MclError::InvalidPacket("route reply needs >=2 hops"));
            }
            pkt.rep.push(RouteReply { hops });
        }
        OptionType::Error => {
            if data.remaining() != 6 + 6 + 6 + 1 + 1 {
                return Err(MclError::InvalidPacket("route error wrong length"));
            }
            let mut src = [0u8; 6];
            data.copy_to_slice(&mut src);
            let mut dst = [0u8; 6];
            data.copy_to_slice(&mut dst);
            let mut unreachable = [0u8; 6];
            data.copy_to_slice(&mut unreachable);
            let in_if = data.get_u8();
            let out_if = data.get_u8();
            pkt.err.push(RouteError {
                src: VirtualAddress::new(src),
                dst: VirtualAddress::new(dst),
                unreachable: VirtualAddress::new(unreachable),
                in_if,
                out_if,
            });
        }
        OptionType::AckReq => {
            if data.remaining() != 2 {
                return Err(MclError::InvalidPacket("ack request wrong length"));
            }
            if pkt.ack_req.is_some() {
                return Err(MclError::InvalidPacket("duplicate ack request"));
            }
            pkt.ack_req = Some(AckRequest { id: data.get_u16() });
        }
        OptionType::Ack => {
            if data.remaining() != 2 {
                return Err(MclError::InvalidPacket("ack wrong length"));
            }
            pkt.ack.push(Ack { id: data.get_u16() });
        }
        OptionType::SourceRt => {
            if data.remaining() < 2 {
                return Err(MclError::InvalidPacket("source route too short"));
            }
            if pkt.source_route.is_some() {
                return Err(MclError::InvalidPacket("duplicate source route"));
            }
            let segments_left = data.get_u8();
            let num_hops = data.get_u8() as usize;
            if num_hops < 2 {
                return Err(MclError::InvalidPacket("source route needs >=2 hops"));
            }
            if segments_left == 0 || segments_left as usize >= num_hops {
                return Err(MclError::InvalidPacket(
                    "source route segments_left out of range",
                ));
            }
            let mut hops = Vec::with_capacity(num_hops);
            for _ in 0..num_hops {
                hops.push(Hop::decode(data).ok_or(MclError::InvalidPacket("bad hop in source route"))?);
            }
            pkt.source_route = Some(SourceRoute {
                hops,
                segments_left,
            });
        }
        OptionType::InfoReq => {
            if !data.is_empty() {
                return Err(MclError::InvalidPacket("info request must be empty"));
            }
            if pkt.info_req.is_some() {
                return Err(MclError::InvalidPacket("duplicate info request"));
            }
            pkt.info_req = Some(InfoRequest);
        }
        OptionType::Info => {
            if data.remaining() != 8 {
                return Err(MclError::InvalidPacket("info reply wrong length"));
            }
            pkt.info_rep.push(InfoReply {
                recv_bad_mac: data.get_u32(),
                forward_drop: data.get_u32(),
            });
        }
        OptionType::Probe => {
            if pkt.probe.is_some() {
                return Err(MclError::InvalidPacket("duplicate probe"));
            }
            let (seq, payload) = decode_probe_body(&data)?;
            pkt.probe = Some(Probe { seq, payload });
        }
        OptionType::ProbeReply => {
            if pkt.probe_reply.is_some() {
                return Err(MclError::InvalidPacket("duplicate probe reply"));
            }
            let (seq, payload) = decode_probe_body(&data)?;
            pkt.probe_reply = Some(ProbeReply { seq, payload });
        }
        OptionType::LinkInfo => {
            if data.remaining() < 12 || data.remaining() % 12 != 0 {
                return Err(MclError::InvalidPacket("link info malformed"));
            }
            let mut entries = Vec::new();
            while data.has_remaining() {
                let mut peer = [0u8; 6];
                data.copy_to_slice(&mut peer);
                let in_if = data.get_u8();
                let out_if = data.get_u8();
                let metric = LinkMetric(data.get_u32());
                entries.push(LinkInfoEntry {
                    peer: VirtualAddress::new(peer),
                    in_if,
                    out_if,
                    metric,
                });
            }
            pkt.link_info.push(LinkInfo { entries });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> VirtualAddress {
        VirtualAddress::new([n, n, n, n, n, n])
    }

    fn key() -> [u8; LQSR_MAC_LENGTH] {
        [7u8; LQSR_MAC_LENGTH]
    }

    fn sample_sr_packet() -> SRPacket {
        let hops = vec![
            Hop {
                addr: addr(1),
                in_if: 0,
                out_if: 1,
                metric: LinkMetric(1),
            },
            Hop {
                addr: addr(2),
                in_if: 1,
                out_if: 1,
                metric: LinkMetric(1),
            },
            Hop {
                addr: addr(3),
                in_if: 1,
                out_if: 0,
                metric: LinkMetric(1),
            },
        ];
        SRPacket {
            source_route: Some(SourceRoute {
                hops: hops.clone(),
                segments_left: 2,
            }),
            ack: vec![Ack { id: 42 }],
            source: addr(1),
            dest: addr(3),
            payload: Bytes::from_static(b"hello mesh"),
            ..Default::default()
        }
    }

    #[test]
    fn round_trip_source_route_and_ack() {
        let pkt = sample_sr_packet();
        let wire = emit(&pkt, &key(), &ToyMac).unwrap();
        let decoded = parse(wire, &key(), &ToyMac).unwrap();
        assert_eq!(decoded.source_route, pkt.source_route);
        assert_eq!(decoded.ack, pkt.ack);
        assert_eq!(decoded.payload, pkt.payload);
        assert_eq!(decoded.source, addr(1));
        assert_eq!(decoded.dest, addr(3));
    }

    #[test]
    fn mac_mismatch_rejected_on_any_byte_flip() {
        let pkt = sample_sr_packet();
        let wire = emit(&pkt, &key(), &ToyMac).unwrap();
        for i in (1 + LQSR_MAC_LENGTH)..wire.len() {
            let mut mutated = wire.to_vec();
            mutated[i] ^= 0xff;
            let res = parse(Bytes::from(mutated), &key(), &ToyMac);
            assert!(res.is_err(), "byte {i} flip should have been rejected");
        }
    }

    #[test]
    fn rejects_empty_packet() {
        let pkt = SRPacket::default();
        assert!(emit(&pkt, &key(), &ToyMac).is_err());
    }

    #[test]
    fn rejects_source_route_with_one_hop() {
        let mut pkt = sample_sr_packet();
        pkt.source_route.as_mut().unwrap().hops.truncate(1);
        assert!(emit(&pkt, &key(), &ToyMac).is_err());
    }

    #[test]
    fn rejects_segments_left_out_of_range() {
        let mut pkt = sample_sr_packet();
        pkt.source_route.as_mut().unwrap().segments_left = 0;
        assert!(emit(&pkt, &key(), &ToyMac).is_err());
    }

    #[test]
    fn ack_request_requires_source_route() {
        let pkt = SRPacket {
            ack_req: Some(AckRequest { id: 1 }),
            payload: Bytes::new(),
            ..Default::default()
        };
        assert!(emit(&pkt, &key(), &ToyMac).is_err());
    }

    #[test]
    fn route_request_round_trip() {
        let pkt = SRPacket {
            req: Some(RouteRequest {
                identifier: 99,
                hops: vec![Hop {
                    addr: addr(5),
                    in_if: 0,
                    out_if: 0,
                    metric: LinkMetric(0),
                }],
            }),
            source: addr(5),
            dest: addr(5),
            ..Default::default()
        };
        let wire = emit(&pkt, &key(), &ToyMac).unwrap();
        let decoded = parse(wire, &key(), &ToyMac).unwrap();
        assert_eq!(decoded.req, pkt.req);
    }

    #[test]
    fn probe_rtt_round_trip() {
        let pkt = SRPacket {
            probe: Some(Probe {
                seq: 7,
                payload: ProbePayload::Rtt {
                    send_time_ticks: 123456,
                },
            }),
            ..Default::default()
        };
        let wire = emit(&pkt, &key(), &ToyMac).unwrap();
        let decoded = parse(wire, &key(), &ToyMac).unwrap();
        assert_eq!(decoded.probe, pkt.probe);
    }

    #[test]
    fn link_info_round_trip() {
        let pkt = SRPacket {
            probe: Some(Probe {
                seq: 1,
                payload: ProbePayload::Rtt { send_time_ticks: 1 },
            }),
            link_info: vec![LinkInfo {
                entries: vec![LinkInfoEntry {
                    peer: addr(9),
                    in_if: 1,
                    out_if: 2,
                    metric: LinkMetric(5),
                }],
            }],
            ..Default::default()
        };
        let wire = emit(&pkt, &key(), &ToyMac).unwrap();
        let decoded = parse(wire, &key(), &ToyMac).unwrap();
        assert_eq!(decoded.link_info, pkt.link_info);
    }
}
