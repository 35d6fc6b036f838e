//! DICOM Upper Layer PDUs and DIMSE command sets
//!
//! Only what a Patient Root C-GET needs: association negotiation with a
//! single presentation context, P-DATA transfer in implicit VR little
//! endian, and orderly release. PDU headers are big endian; DIMSE elements
//! are little endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use honeysift_common::{ProbeError, ProbeResult};

pub const APPLICATION_CONTEXT: &str = "1.2.840.10008.3.1.1.1";
pub const PATIENT_ROOT_GET: &str = "1.2.840.10008.5.1.4.1.2.1.3";
pub const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.329800735698586629295641978511506172918";

pub const PRESENTATION_CONTEXT_ID: u8 = 1;
pub const MAX_PDU_LENGTH: u32 = 16_384;
/// Largest inbound PDU accepted before the peer is considered hostile.
const MAX_INBOUND_PDU: usize = 1024 * 1024;
const FIXED_ASSOCIATE_FIELDS: usize = 68;

pub mod pdu_type {
    pub const ASSOCIATE_RQ: u8 = 0x01;
    pub const ASSOCIATE_AC: u8 = 0x02;
    pub const ASSOCIATE_RJ: u8 = 0x03;
    pub const P_DATA_TF: u8 = 0x04;
    pub const RELEASE_RQ: u8 = 0x05;
    pub const RELEASE_RP: u8 = 0x06;
    pub const ABORT: u8 = 0x07;
}

pub mod item_type {
    pub const APPLICATION_CONTEXT: u8 = 0x10;
    pub const PRESENTATION_CONTEXT_RQ: u8 = 0x20;
    pub const PRESENTATION_CONTEXT_AC: u8 = 0x21;
    pub const ABSTRACT_SYNTAX: u8 = 0x30;
    pub const TRANSFER_SYNTAX: u8 = 0x40;
    pub const USER_INFORMATION: u8 = 0x50;
    pub const MAX_LENGTH: u8 = 0x51;
    pub const IMPLEMENTATION_CLASS_UID: u8 = 0x52;
}

pub mod command {
    pub const C_GET_RQ: u16 = 0x0010;
    pub const C_GET_RSP: u16 = 0x8010;
    pub const PRIORITY_MEDIUM: u16 = 0x0000;
    pub const DATASET_PRESENT: u16 = 0x0001;
    pub const NO_DATASET: u16 = 0x0101;
    pub const STATUS_PENDING: u16 = 0xFF00;
    pub const STATUS_PENDING_WARNING: u16 = 0xFF01;
}

/// PDV control header bits.
const PDV_COMMAND: u8 = 0x01;
const PDV_LAST: u8 = 0x02;

/// One presentation data value from a P-DATA-TF.
#[derive(Debug, Clone, PartialEq)]
pub struct Pdv {
    pub context_id: u8,
    pub is_command: bool,
    pub is_last: bool,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pdu {
    AssociateRq,
    AssociateAc { accepted: bool },
    AssociateRj { result: u8, source: u8, reason: u8 },
    PData(Vec<Pdv>),
    ReleaseRq,
    ReleaseRp,
    Abort { source: u8, reason: u8 },
}

/// Fields of interest from a DIMSE command set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSet {
    pub command_field: Option<u16>,
    pub message_id_responded: Option<u16>,
    pub status: Option<u16>,
}

impl CommandSet {
    pub fn is_pending(&self) -> bool {
        matches!(
            self.status,
            Some(command::STATUS_PENDING | command::STATUS_PENDING_WARNING)
        )
    }
}

fn frame(pdu: u8, body: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(6 + body.len());
    out.put_u8(pdu);
    out.put_u8(0);
    out.put_u32(body.len() as u32);
    out.extend_from_slice(body);
    out
}

fn put_item(buf: &mut BytesMut, item: u8, content: &[u8]) {
    buf.put_u8(item);
    buf.put_u8(0);
    buf.put_u16(content.len() as u16);
    buf.extend_from_slice(content);
}

fn put_ae_title(buf: &mut BytesMut, title: &str) {
    let mut field = [b' '; 16];
    for (dst, src) in field.iter_mut().zip(title.bytes()) {
        *dst = src;
    }
    buf.extend_from_slice(&field);
}

fn put_pdv(buf: &mut BytesMut, control: u8, data: &[u8]) {
    buf.put_u32(2 + data.len() as u32);
    buf.put_u8(PRESENTATION_CONTEXT_ID);
    buf.put_u8(control);
    buf.extend_from_slice(data);
}

fn put_element(buf: &mut BytesMut, group: u16, element: u16, value: &[u8]) {
    buf.put_u16_le(group);
    buf.put_u16_le(element);
    buf.put_u32_le(value.len() as u32);
    buf.extend_from_slice(value);
}

/// Values must have even length; UIDs pad with NUL, text with space.
fn padded(value: &str, pad: u8) -> Vec<u8> {
    let mut bytes = value.as_bytes().to_vec();
    if bytes.len() % 2 == 1 {
        bytes.push(pad);
    }
    bytes
}

/// Prefix command elements with their (0000,0000) group length.
fn with_group_length(elements: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(12 + elements.len());
    put_element(&mut out, 0x0000, 0x0000, &(elements.len() as u32).to_le_bytes());
    out.extend_from_slice(elements);
    out
}

pub fn associate_rq(calling_ae: &str, called_ae: &str) -> BytesMut {
    let mut body = BytesMut::with_capacity(256);
    body.put_u16(0x0001);
    body.put_u16(0);
    put_ae_title(&mut body, called_ae);
    put_ae_title(&mut body, calling_ae);
    body.put_bytes(0, 32);

    put_item(&mut body, item_type::APPLICATION_CONTEXT, APPLICATION_CONTEXT.as_bytes());

    let mut context = BytesMut::new();
    context.put_u8(PRESENTATION_CONTEXT_ID);
    context.put_bytes(0, 3);
    put_item(&mut context, item_type::ABSTRACT_SYNTAX, PATIENT_ROOT_GET.as_bytes());
    put_item(&mut context, item_type::TRANSFER_SYNTAX, IMPLICIT_VR_LE.as_bytes());
    put_item(&mut body, item_type::PRESENTATION_CONTEXT_RQ, &context);

    let mut user = BytesMut::new();
    put_item(&mut user, item_type::MAX_LENGTH, &MAX_PDU_LENGTH.to_be_bytes());
    put_item(&mut user, item_type::IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_CLASS_UID.as_bytes());
    put_item(&mut body, item_type::USER_INFORMATION, &user);

    frame(pdu_type::ASSOCIATE_RQ, &body)
}

/// C-GET-RQ at PATIENT level for one patient id, as a single P-DATA-TF.
pub fn c_get_rq(message_id: u16, patient_id: &str) -> BytesMut {
    let mut elements = BytesMut::new();
    put_element(&mut elements, 0x0000, 0x0002, &padded(PATIENT_ROOT_GET, 0));
    put_element(&mut elements, 0x0000, 0x0100, &command::C_GET_RQ.to_le_bytes());
    put_element(&mut elements, 0x0000, 0x0110, &message_id.to_le_bytes());
    put_element(&mut elements, 0x0000, 0x0700, &command::PRIORITY_MEDIUM.to_le_bytes());
    put_element(&mut elements, 0x0000, 0x0800, &command::DATASET_PRESENT.to_le_bytes());
    let command_set = with_group_length(&elements);

    let mut identifier = BytesMut::new();
    put_element(&mut identifier, 0x0008, 0x0052, &padded("PATIENT", b' '));
    put_element(&mut identifier, 0x0010, 0x0020, &padded(patient_id, b' '));

    let mut body = BytesMut::new();
    put_pdv(&mut body, PDV_COMMAND | PDV_LAST, &command_set);
    put_pdv(&mut body, PDV_LAST, &identifier);
    frame(pdu_type::P_DATA_TF, &body)
}

pub fn release_rq() -> BytesMut {
    frame(pdu_type::RELEASE_RQ, &[0; 4])
}

/// Read one complete PDU.
pub async fn read_pdu<R: AsyncRead + Unpin>(reader: &mut R) -> ProbeResult<Pdu> {
    let mut header = [0u8; 6];
    reader.read_exact(&mut header).await?;
    let length = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
    if length > MAX_INBOUND_PDU {
        return Err(ProbeError::protocol(format!("PDU of {length} bytes exceeds limit")));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    parse_pdu(header[0], Bytes::from(body))
}

fn parse_pdu(pdu: u8, mut body: Bytes) -> ProbeResult<Pdu> {
    match pdu {
        pdu_type::ASSOCIATE_RQ => Ok(Pdu::AssociateRq),
        pdu_type::ASSOCIATE_AC => parse_associate_ac(body),
        pdu_type::ASSOCIATE_RJ | pdu_type::ABORT if body.remaining() < 4 => {
            Err(ProbeError::protocol("truncated reject/abort PDU"))
        }
        pdu_type::ASSOCIATE_RJ => {
            body.advance(1);
            Ok(Pdu::AssociateRj {
                result: body.get_u8(),
                source: body.get_u8(),
                reason: body.get_u8(),
            })
        }
        pdu_type::P_DATA_TF => parse_pdata(body).map(Pdu::PData),
        pdu_type::RELEASE_RQ => Ok(Pdu::ReleaseRq),
        pdu_type::RELEASE_RP => Ok(Pdu::ReleaseRp),
        pdu_type::ABORT => {
            body.advance(2);
            Ok(Pdu::Abort {
                source: body.get_u8(),
                reason: body.get_u8(),
            })
        }
        other => Err(ProbeError::protocol(format!("unknown PDU type 0x{other:02x}"))),
    }
}

/// Accepted only if our presentation context came back with result 0.
fn parse_associate_ac(mut body: Bytes) -> ProbeResult<Pdu> {
    if body.remaining() < FIXED_ASSOCIATE_FIELDS {
        return Err(ProbeError::protocol("truncated A-ASSOCIATE-AC"));
    }
    body.advance(FIXED_ASSOCIATE_FIELDS);

    let mut accepted = false;
    while body.remaining() >= 4 {
        let item = body.get_u8();
        body.advance(1);
        let length = body.get_u16() as usize;
        if body.remaining() < length {
            return Err(ProbeError::protocol("truncated A-ASSOCIATE-AC item"));
        }
        let content = body.split_to(length);
        if item == item_type::PRESENTATION_CONTEXT_AC
            && content.len() >= 4
            && content[0] == PRESENTATION_CONTEXT_ID
            && content[2] == 0
        {
            accepted = true;
        }
    }
    Ok(Pdu::AssociateAc { accepted })
}

fn parse_pdata(mut body: Bytes) -> ProbeResult<Vec<Pdv>> {
    let mut pdvs = Vec::new();
    while body.remaining() >= 4 {
        let length = body.get_u32() as usize;
        if length < 2 || body.remaining() < length {
            return Err(ProbeError::protocol("malformed PDV item"));
        }
        let context_id = body.get_u8();
        let control = body.get_u8();
        pdvs.push(Pdv {
            context_id,
            is_command: control & PDV_COMMAND != 0,
            is_last: control & PDV_LAST != 0,
            data: body.split_to(length - 2),
        });
    }
    Ok(pdvs)
}

/// Split an implicit VR little endian stream into (group, element, value).
pub fn parse_elements(mut data: &[u8]) -> ProbeResult<Vec<(u16, u16, Bytes)>> {
    let mut elements = Vec::new();
    while data.remaining() >= 8 {
        let group = data.get_u16_le();
        let element = data.get_u16_le();
        let length = data.get_u32_le() as usize;
        if data.remaining() < length {
            return Err(ProbeError::protocol(format!(
                "element ({group:04x},{element:04x}) overruns dataset"
            )));
        }
        elements.push((group, element, Bytes::copy_from_slice(&data[..length])));
        data.advance(length);
    }
    Ok(elements)
}

pub fn parse_command(data: &[u8]) -> ProbeResult<CommandSet> {
    let us = |value: &Bytes| (value.len() >= 2).then(|| u16::from_le_bytes([value[0], value[1]]));

    let mut command_set = CommandSet::default();
    for (group, element, value) in parse_elements(data)? {
        match (group, element) {
            (0x0000, 0x0100) => command_set.command_field = us(&value),
            (0x0000, 0x0120) => command_set.message_id_responded = us(&value),
            (0x0000, 0x0900) => command_set.status = us(&value),
            _ => {}
        }
    }
    Ok(command_set)
}

/// Text form of a DIMSE status, as compared against signature output.
pub fn render_status(status: u16) -> String {
    format!("(0000,0900) Status US: {status} [0x{status:04X}]")
}

#[cfg(test)]
pub(crate) mod scp {
    //! Encoders for the acceptor side, used by test SCPs.

    use super::*;

    pub fn associate_ac(accept: bool) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_u16(0x0001);
        body.put_u16(0);
        put_ae_title(&mut body, "ANY-SCP");
        put_ae_title(&mut body, "ANY-SCU");
        body.put_bytes(0, 32);
        put_item(&mut body, item_type::APPLICATION_CONTEXT, APPLICATION_CONTEXT.as_bytes());

        let mut context = BytesMut::new();
        context.put_u8(PRESENTATION_CONTEXT_ID);
        context.put_u8(0);
        context.put_u8(if accept { 0 } else { 3 });
        context.put_u8(0);
        put_item(&mut context, item_type::TRANSFER_SYNTAX, IMPLICIT_VR_LE.as_bytes());
        put_item(&mut body, item_type::PRESENTATION_CONTEXT_AC, &context);

        frame(pdu_type::ASSOCIATE_AC, &body)
    }

    pub fn associate_rj() -> BytesMut {
        frame(pdu_type::ASSOCIATE_RJ, &[0, 1, 1, 3])
    }

    pub fn c_get_rsp(message_id: u16, status: u16) -> BytesMut {
        let mut elements = BytesMut::new();
        put_element(&mut elements, 0x0000, 0x0002, &padded(PATIENT_ROOT_GET, 0));
        put_element(&mut elements, 0x0000, 0x0100, &command::C_GET_RSP.to_le_bytes());
        put_element(&mut elements, 0x0000, 0x0120, &message_id.to_le_bytes());
        put_element(&mut elements, 0x0000, 0x0800, &command::NO_DATASET.to_le_bytes());
        put_element(&mut elements, 0x0000, 0x0900, &status.to_le_bytes());

        let mut body = BytesMut::new();
        put_pdv(&mut body, PDV_COMMAND | PDV_LAST, &with_group_length(&elements));
        frame(pdu_type::P_DATA_TF, &body)
    }

    pub fn release_rp() -> BytesMut {
        frame(pdu_type::RELEASE_RP, &[0; 4])
    }

    /// Patient ID carried by a C-GET-RQ identifier, trailing padding removed.
    pub fn patient_id(pdvs: &[Pdv]) -> Option<String> {
        let dataset = pdvs.iter().find(|p| !p.is_command)?;
        parse_elements(&dataset.data)
            .ok()?
            .into_iter()
            .find(|(g, e, _)| (*g, *e) == (0x0010, 0x0020))
            .map(|(_, _, v)| String::from_utf8_lossy(&v).trim_end().to_string())
    }
}
