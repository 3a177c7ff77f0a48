use crate::prelude::*;

use crate::modbus::packet::*;
use crate::register::MAX_READ_SPAN;

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    net2::TcpStreamExt,
    std::time::Duration,
    tokio::{io::AsyncWriteExt, net::TcpStream, sync::Mutex},
    tokio_util::codec::Framed,
};

const TCP_KEEPALIVE_SECS: u64 = 60;

// RegisterIo {{{
/// Holding-register access to one controller. Implemented by [`Transport`]
/// for real hardware and by in-memory fakes in tests.
#[async_trait]
pub trait RegisterIo: Send + Sync {
    async fn read_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, TransportError>;
    async fn write_register(&self, address: u16, value: u16) -> Result<(), TransportError>;
    async fn write_registers(&self, address: u16, values: &[u16]) -> Result<(), TransportError>;
    /// Drops the session. Waits for any call in flight.
    async fn close(&self);
} // }}}

struct State {
    session: Option<Framed<TcpStream, ClientCodec>>,
    transaction_id: u16,
}

/// Modbus TCP client. Connects lazily, keeps the session warm between
/// calls and serializes every call behind one lock.
pub struct Transport {
    controller: config::Controller,
    state: Mutex<State>,
}

impl Transport {
    pub fn new(controller: &config::Controller) -> Self {
        Self {
            controller: controller.clone(),
            state: Mutex::new(State {
                session: None,
                transaction_id: 0,
            }),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.session.is_some()
    }

    /// Opens the session now instead of on the first call.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.session.is_none() {
            let timeout = self.controller.timeout();
            let framed = tokio::time::timeout(timeout, self.open())
                .await
                .map_err(|_| {
                    TransportError::timeout(format!("connect timed out after {}s", timeout.as_secs()))
                })??;
            state.session = Some(framed);
        }
        Ok(())
    }

    async fn open(&self) -> Result<Framed<TcpStream, ClientCodec>, TransportError> {
        let c = &self.controller;
        info!("connecting to controller at {}:{}", c.host(), c.port());

        let stream = TcpStream::connect((c.host(), c.port()))
            .await
            .map_err(|e| TransportError::refused(format!("{}:{}: {}", c.host(), c.port(), e)))?;

        let std_stream = stream
            .into_std()
            .map_err(|e| TransportError::refused(e.to_string()))?;
        if let Err(e) = std_stream.set_keepalive(Some(Duration::new(TCP_KEEPALIVE_SECS, 0))) {
            warn!("Failed to set TCP keepalive: {}", e);
        }
        let stream =
            TcpStream::from_std(std_stream).map_err(|e| TransportError::refused(e.to_string()))?;

        if c.use_tcp_nodelay() {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY: {}", e);
            }
        }

        info!("controller {}:{}: connected", c.host(), c.port());

        Ok(Framed::new(stream, ClientCodec))
    }

    /// Sends one request and waits for its reply, within the configured
    /// timeout. Any failure other than an exception reply drops the
    /// session so the next call reconnects.
    async fn call(&self, request: Request) -> Result<Response, TransportError> {
        let mut state = self.state.lock().await;
        let timeout = self.controller.timeout();

        let result = match tokio::time::timeout(timeout, self.exchange(&mut state, request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout(format!(
                "no reply within {}s",
                timeout.as_secs()
            ))),
        };

        if let Err(e) = &result {
            if !e.keeps_session() && state.session.take().is_some() {
                warn!("controller session dropped: {}", e);
            }
        }

        result
    }

    async fn exchange(&self, state: &mut State, request: Request) -> Result<Response, TransportError> {
        if state.session.is_none() {
            state.session = Some(self.open().await?);
        }

        state.transaction_id = state.transaction_id.wrapping_add(1);
        let transaction_id = state.transaction_id;
        let unit_id = self.controller.unit_id();

        let framed = state
            .session
            .as_mut()
            .ok_or_else(|| TransportError::disconnected("no session"))?;

        let frame = Frame::new(transaction_id, unit_id, request.clone());
        debug!("TX {:?}", frame);
        framed
            .send(frame)
            .await
            .map_err(|e| TransportError::disconnected(format!("send failed: {}", e)))?;

        let reply = match framed.next().await {
            Some(Ok(reply)) => reply,
            Some(Err(e)) => {
                if e.downcast_ref::<std::io::Error>().is_some() {
                    return Err(TransportError::disconnected(e.to_string()));
                }
                return Err(TransportError::protocol(e.to_string()));
            }
            None => return Err(TransportError::disconnected("connection closed by peer")),
        };
        debug!("RX {:?}", reply);

        if reply.transaction_id != transaction_id {
            return Err(TransportError::protocol(format!(
                "transaction id mismatch: sent {}, got {}",
                transaction_id, reply.transaction_id
            )));
        }
        if reply.unit_id != unit_id {
            return Err(TransportError::protocol(format!(
                "unit id mismatch: sent {}, got {}",
                unit_id, reply.unit_id
            )));
        }

        Self::check_reply(&request, reply.pdu)
    }

    fn check_reply(request: &Request, reply: Response) -> Result<Response, TransportError> {
        match (request, &reply) {
            (_, Response::Exception(ex)) if ex.function == request.function() => {
                Err(TransportError::new(
                    TransportErrorKind::Exception(ex.code),
                    ExceptionCode::describe(ex.code),
                ))
            }
            (Request::ReadHolding(req), Response::ReadHolding(res)) => {
                if res.values.len() != req.count as usize {
                    return Err(TransportError::protocol(format!(
                        "asked for {} registers, got {}",
                        req.count,
                        res.values.len()
                    )));
                }
                Ok(reply)
            }
            (Request::WriteSingle(req), Response::WriteSingle(res)) => {
                if req != res {
                    return Err(TransportError::protocol(format!(
                        "write echo mismatch: sent {:?}, got {:?}",
                        req, res
                    )));
                }
                Ok(reply)
            }
            (Request::WriteMultiple(req), Response::WriteMultiple(res)) => {
                if res.address != req.address || res.count as usize != req.values.len() {
                    return Err(TransportError::protocol(format!(
                        "write multiple echo mismatch: sent {}+{}, got {}+{}",
                        req.address,
                        req.values.len(),
                        res.address,
                        res.count
                    )));
                }
                Ok(reply)
            }
            _ => Err(TransportError::protocol(format!(
                "unexpected reply {:?} to {:?}",
                reply.function(),
                request.function()
            ))),
        }
    }
}

#[async_trait]
impl RegisterIo for Transport {
    async fn read_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        if count == 0 || count > MAX_READ_SPAN {
            return Err(TransportError::protocol(format!(
                "cannot read {} registers in one request",
                count
            )));
        }

        match self
            .call(Request::ReadHolding(ReadHoldingRequest { start, count }))
            .await?
        {
            Response::ReadHolding(r) => Ok(r.values),
            other => Err(TransportError::protocol(format!("unexpected reply {:?}", other))),
        }
    }

    async fn write_register(&self, address: u16, value: u16) -> Result<(), TransportError> {
        self.call(Request::WriteSingle(WriteSingle { address, value }))
            .await?;
        Ok(())
    }

    async fn write_registers(&self, address: u16, values: &[u16]) -> Result<(), TransportError> {
        if values.is_empty() || values.len() > 123 {
            return Err(TransportError::protocol(format!(
                "cannot write {} registers in one request",
                values.len()
            )));
        }

        self.call(Request::WriteMultiple(WriteMultipleRequest {
            address,
            values: values.to_vec(),
        }))
        .await?;
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock().await;
        if let Some(framed) = state.session.take() {
            let mut stream = framed.into_inner();
            if let Err(e) = stream.shutdown().await {
                debug!("error shutting down controller socket: {}", e);
            }
            info!("controller {}:{}: disconnected", self.controller.host(), self.controller.port());
        }
    }
}
