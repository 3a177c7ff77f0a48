use crate::prelude::*;

use bytes::{Buf, BufMut, BytesMut};
use enum_dispatch::*;
use nom::{
    multi::count,
    number::complete::{be_u16, be_u8},
    IResult,
};
use nom_derive::{Nom, Parse};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// MBAP header plus function code is the smallest thing worth parsing.
pub const HEADER_LEN: usize = 7;
/// Largest `length` an MBAP header may carry (unit id + 253 byte PDU).
pub const MAX_LENGTH_FIELD: u16 = 254;
const EXCEPTION_FLAG: u8 = 0x80;

// MbapHeader {{{
#[derive(Clone, Copy, Debug, Eq, PartialEq, Nom)]
#[nom(BigEndian)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Bytes following this field: unit id plus PDU.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn new(transaction_id: u16, unit_id: u8, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length: pdu_len as u16 + 1,
            unit_id,
        }
    }

    fn put(&self, dst: &mut BytesMut) {
        dst.put_u16(self.transaction_id);
        dst.put_u16(self.protocol_id);
        dst.put_u16(self.length);
        dst.put_u8(self.unit_id);
    }

    fn frame_len(&self) -> usize {
        6 + self.length as usize
    }
} // }}}

// {{{ FunctionCode
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHolding = 0x03,
    WriteSingle = 0x06,
    WriteMultiple = 0x10,
}
// }}}

// {{{ ExceptionCode
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetFailed = 0x0B,
}

impl ExceptionCode {
    pub fn describe(code: u8) -> &'static str {
        match Self::try_from(code) {
            Ok(Self::IllegalFunction) => "illegal function",
            Ok(Self::IllegalDataAddress) => "illegal data address",
            Ok(Self::IllegalDataValue) => "illegal data value",
            Ok(Self::ServerDeviceFailure) => "server device failure",
            Ok(Self::Acknowledge) => "acknowledge",
            Ok(Self::ServerDeviceBusy) => "server device busy",
            Ok(Self::GatewayPathUnavailable) => "gateway path unavailable",
            Ok(Self::GatewayTargetFailed) => "gateway target failed",
            Err(_) => "unknown exception",
        }
    }
}
// }}}

#[enum_dispatch]
pub trait PduCommon {
    fn function(&self) -> FunctionCode;
    /// PDU bytes, function code first.
    fn bytes(&self) -> Vec<u8>;
}

/////////////
//
// REQUESTS
//
/////////////

#[enum_dispatch(PduCommon)]
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Request {
    ReadHolding(ReadHoldingRequest),
    WriteSingle(WriteSingle),
    WriteMultiple(WriteMultipleRequest),
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct ReadHoldingRequest {
    pub start: u16,
    pub count: u16,
}

impl PduCommon for ReadHoldingRequest {
    fn function(&self) -> FunctionCode {
        FunctionCode::ReadHolding
    }

    fn bytes(&self) -> Vec<u8> {
        let mut r = vec![self.function().into()];
        r.extend_from_slice(&self.start.to_be_bytes());
        r.extend_from_slice(&self.count.to_be_bytes());
        r
    }
}

/// Write single register. The reply echoes the request, so this is used in
/// both directions.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct WriteSingle {
    pub address: u16,
    pub value: u16,
}

impl PduCommon for WriteSingle {
    fn function(&self) -> FunctionCode {
        FunctionCode::WriteSingle
    }

    fn bytes(&self) -> Vec<u8> {
        let mut r = vec![self.function().into()];
        r.extend_from_slice(&self.address.to_be_bytes());
        r.extend_from_slice(&self.value.to_be_bytes());
        r
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct WriteMultipleRequest {
    pub address: u16,
    pub values: Vec<u16>,
}

impl PduCommon for WriteMultipleRequest {
    fn function(&self) -> FunctionCode {
        FunctionCode::WriteMultiple
    }

    fn bytes(&self) -> Vec<u8> {
        let mut r = vec![self.function().into()];
        r.extend_from_slice(&self.address.to_be_bytes());
        r.extend_from_slice(&(self.values.len() as u16).to_be_bytes());
        r.push((self.values.len() * 2) as u8);
        for value in &self.values {
            r.extend_from_slice(&value.to_be_bytes());
        }
        r
    }
}

impl Request {
    pub fn parse(pdu: &[u8]) -> Result<Self> {
        let (&function, body) = pdu
            .split_first()
            .ok_or_else(|| anyhow!("empty request pdu"))?;

        let r = match FunctionCode::try_from(function)? {
            FunctionCode::ReadHolding => {
                let (_, (start, count)) = finish(Self::pair(body))?;
                Request::ReadHolding(ReadHoldingRequest { start, count })
            }
            FunctionCode::WriteSingle => {
                let (_, (address, value)) = finish(Self::pair(body))?;
                Request::WriteSingle(WriteSingle { address, value })
            }
            FunctionCode::WriteMultiple => {
                let (rest, (address, quantity)) = finish(Self::pair(body))?;
                let (rest, byte_count) = finish(be_u8(rest))?;
                if byte_count as usize != quantity as usize * 2 {
                    bail!("write multiple: byte count {} for {} registers", byte_count, quantity);
                }
                let (_, values) = finish(count(be_u16, quantity as usize)(rest))?;
                Request::WriteMultiple(WriteMultipleRequest { address, values })
            }
        };

        Ok(r)
    }

    fn pair(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
        let (input, a) = be_u16(input)?;
        let (input, b) = be_u16(input)?;
        Ok((input, (a, b)))
    }
}

/////////////
//
// RESPONSES
//
/////////////

#[enum_dispatch(PduCommon)]
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Response {
    ReadHolding(ReadHoldingResponse),
    WriteSingle(WriteSingle),
    WriteMultiple(WriteMultipleResponse),
    Exception(ExceptionResponse),
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ReadHoldingResponse {
    pub values: Vec<u16>,
}

impl PduCommon for ReadHoldingResponse {
    fn function(&self) -> FunctionCode {
        FunctionCode::ReadHolding
    }

    fn bytes(&self) -> Vec<u8> {
        let mut r = vec![self.function().into(), (self.values.len() * 2) as u8];
        for value in &self.values {
            r.extend_from_slice(&value.to_be_bytes());
        }
        r
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct WriteMultipleResponse {
    pub address: u16,
    pub count: u16,
}

impl PduCommon for WriteMultipleResponse {
    fn function(&self) -> FunctionCode {
        FunctionCode::WriteMultiple
    }

    fn bytes(&self) -> Vec<u8> {
        let mut r = vec![self.function().into()];
        r.extend_from_slice(&self.address.to_be_bytes());
        r.extend_from_slice(&self.count.to_be_bytes());
        r
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub code: u8,
}

impl PduCommon for ExceptionResponse {
    fn function(&self) -> FunctionCode {
        self.function
    }

    fn bytes(&self) -> Vec<u8> {
        vec![u8::from(self.function) | EXCEPTION_FLAG, self.code]
    }
}

impl Response {
    pub fn parse(pdu: &[u8]) -> Result<Self> {
        let (&function, body) = pdu
            .split_first()
            .ok_or_else(|| anyhow!("empty response pdu"))?;

        if function & EXCEPTION_FLAG != 0 {
            let (_, code) = finish(be_u8(body))?;
            return Ok(Response::Exception(ExceptionResponse {
                function: FunctionCode::try_from(function & !EXCEPTION_FLAG)?,
                code,
            }));
        }

        let r = match FunctionCode::try_from(function)? {
            FunctionCode::ReadHolding => {
                let (rest, byte_count) = finish(be_u8(body))?;
                if byte_count % 2 != 0 || rest.len() != byte_count as usize {
                    bail!(
                        "read holding: byte count {} with {} data bytes",
                        byte_count,
                        rest.len()
                    );
                }
                let (_, values) = finish(count(be_u16, byte_count as usize / 2)(rest))?;
                Response::ReadHolding(ReadHoldingResponse { values })
            }
            FunctionCode::WriteSingle => {
                let (_, (address, value)) = finish(Request::pair(body))?;
                Response::WriteSingle(WriteSingle { address, value })
            }
            FunctionCode::WriteMultiple => {
                let (_, (address, count)) = finish(Request::pair(body))?;
                Response::WriteMultiple(WriteMultipleResponse { address, count })
            }
        };

        Ok(r)
    }
}

fn finish<T>(r: IResult<&[u8], T>) -> Result<(&[u8], T)> {
    r.map_err(|e| anyhow!("truncated pdu: {:?}", e.map_input(|i| i.len())))
}

/////////////
//
// FRAMES
//
/////////////

/// One MBAP-framed PDU.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Frame<T> {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub pdu: T,
}

pub type RequestFrame = Frame<Request>;
pub type ResponseFrame = Frame<Response>;

impl<T: PduCommon> Frame<T> {
    pub fn new(transaction_id: u16, unit_id: u8, pdu: T) -> Self {
        Self {
            transaction_id,
            unit_id,
            pdu,
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut dst = BytesMut::new();
        self.put(&mut dst);
        dst.to_vec()
    }

    fn put(&self, dst: &mut BytesMut) {
        let pdu = self.pdu.bytes();
        MbapHeader::new(self.transaction_id, self.unit_id, pdu.len()).put(dst);
        dst.extend_from_slice(&pdu);
    }
}

/// Splits one complete frame off the front of `src`, if there is one.
fn split_frame(src: &mut BytesMut) -> Result<Option<(MbapHeader, BytesMut)>> {
    if src.len() < HEADER_LEN {
        return Ok(None);
    }

    let header = match MbapHeader::parse(&src[..HEADER_LEN]) {
        Ok((_, header)) => header,
        Err(_) => bail!("unparseable MBAP header"),
    };

    if header.protocol_id != 0 {
        bail!("unexpected protocol id {}", header.protocol_id);
    }
    if header.length < 2 || header.length > MAX_LENGTH_FIELD {
        bail!("bad MBAP length {}", header.length);
    }

    let frame_len = header.frame_len();
    if src.len() < frame_len {
        src.reserve(frame_len - src.len());
        return Ok(None);
    }

    let mut frame = src.split_to(frame_len);
    frame.advance(HEADER_LEN);

    Ok(Some((header, frame)))
}

// codecs {{{
/// Client side: writes requests, reads responses.
#[derive(Debug, Default)]
pub struct ClientCodec;

impl tokio_util::codec::Decoder for ClientCodec {
    type Item = ResponseFrame;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match split_frame(src)? {
            Some((header, pdu)) => Ok(Some(Frame::new(
                header.transaction_id,
                header.unit_id,
                Response::parse(&pdu)?,
            ))),
            None => Ok(None),
        }
    }
}

impl tokio_util::codec::Encoder<RequestFrame> for ClientCodec {
    type Error = anyhow::Error;

    fn encode(&mut self, item: RequestFrame, dst: &mut BytesMut) -> Result<()> {
        item.put(dst);
        Ok(())
    }
}

/// Server side: reads requests, writes responses. Used by the fake
/// controller in the integration tests.
#[derive(Debug, Default)]
pub struct ServerCodec;

impl tokio_util::codec::Decoder for ServerCodec {
    type Item = RequestFrame;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match split_frame(src)? {
            Some((header, pdu)) => Ok(Some(Frame::new(
                header.transaction_id,
                header.unit_id,
                Request::parse(&pdu)?,
            ))),
            None => Ok(None),
        }
    }
}

impl tokio_util::codec::Encoder<ResponseFrame> for ServerCodec {
    type Error = anyhow::Error;

    fn encode(&mut self, item: ResponseFrame, dst: &mut BytesMut) -> Result<()> {
        item.put(dst);
        Ok(())
    }
}
// }}}
