#![allow(dead_code)]

pub use neptun_bridge::prelude::*;
pub use std::sync::Arc;
pub use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use neptun_bridge::modbus::packet::*;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

pub const REGISTER_SPACE: usize = 256;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory;
impl Factory {
    pub fn controller() -> config::Controller {
        config::Controller::new("localhost", 502)
    }

    pub fn wireless_controller(sensors: u8) -> config::Controller {
        let mut controller = Self::controller();
        controller.enable_wireless = true;
        controller.wireless_sensors = Some(sensors);
        controller
    }

    pub fn config(controller: config::Controller) -> ConfigWrapper {
        ConfigWrapper::from_config(config::Config::from_controller(controller).unwrap())
    }

    pub fn map(enable_wireless: bool, wireless_sensors: u8, leak_lines: u8) -> RegisterMap {
        RegisterMap::new(enable_wireless, wireless_sensors, leak_lines).unwrap()
    }

    /// Words for one poll cycle, with `value(address)` at each address the
    /// map reads.
    pub fn words(map: &RegisterMap, value: impl Fn(u16) -> u16) -> Vec<u16> {
        map.spans()
            .iter()
            .flat_map(|span| span.start..span.end())
            .map(value)
            .collect()
    }
}

// MockController {{{
/// In-memory controller behind the register I/O trait.
#[derive(Default)]
pub struct MockController {
    registers: Mutex<Vec<u16>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    closes: AtomicUsize,
    fail_reads: AtomicBool,
    reject_writes: Mutex<Option<u8>>,
    write_log: Mutex<Vec<(u16, Vec<u16>)>>,
}

impl MockController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registers: Mutex::new(vec![0; REGISTER_SPACE]),
            ..Default::default()
        })
    }

    pub fn set(&self, address: u16, value: u16) {
        self.registers.lock().unwrap()[address as usize] = value;
    }

    pub fn get(&self, address: u16) -> u16 {
        self.registers.lock().unwrap()[address as usize]
    }

    pub fn set_counter(&self, id: CounterId, litres: u32) {
        let address = neptun_bridge::register::counter_address(id);
        let [hi, lo] = neptun_bridge::register::counter_to_words(litres);
        self.set(address, hi);
        self.set(address + 1, lo);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn write_log(&self) -> Vec<(u16, Vec<u16>)> {
        self.write_log.lock().unwrap().clone()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn reject_writes(&self, code: Option<u8>) {
        *self.reject_writes.lock().unwrap() = code;
    }

    fn write(&self, address: u16, values: &[u16]) -> Result<(), TransportError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = *self.reject_writes.lock().unwrap() {
            return Err(TransportError::new(TransportErrorKind::Exception(code), "rejected"));
        }

        let mut registers = self.registers.lock().unwrap();
        for (i, value) in values.iter().enumerate() {
            registers[address as usize + i] = *value;
        }
        self.write_log.lock().unwrap().push((address, values.to_vec()));
        Ok(())
    }
}

#[async_trait]
impl RegisterIo for MockController {
    async fn read_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(TransportError::timeout("mock timeout"));
        }

        let registers = self.registers.lock().unwrap();
        Ok(registers[start as usize..(start + count) as usize].to_vec())
    }

    async fn write_register(&self, address: u16, value: u16) -> Result<(), TransportError> {
        self.write(address, &[value])
    }

    async fn write_registers(&self, address: u16, values: &[u16]) -> Result<(), TransportError> {
        self.write(address, values)
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
} // }}}

// FakeServer {{{
#[derive(Debug, Default)]
pub struct ServerState {
    pub registers: Vec<u16>,
    pub connections: usize,
    pub requests: usize,
    /// Swallow requests without answering.
    pub silent: bool,
    /// Hang up after this many requests on a connection.
    pub close_after: Option<usize>,
    /// Answer writes to this address with an exception code.
    pub reject: Option<(u16, u8)>,
    /// Answer with the wrong transaction id.
    pub scramble_transaction: bool,
}

/// Modbus TCP server on localhost backed by a register array.
pub struct FakeServer {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(ServerState {
            registers: vec![0; REGISTER_SPACE],
            ..Default::default()
        }));

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.lock().unwrap().connections += 1;
                let conn_state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = Self::serve(Framed::new(stream, ServerCodec), conn_state).await;
                });
            }
        });

        Ok(Self { addr, state })
    }

    pub fn controller(&self) -> config::Controller {
        let mut controller = config::Controller::new("127.0.0.1", self.addr.port());
        controller.timeout = Some(1);
        controller
    }

    pub fn set(&self, address: u16, value: u16) {
        self.state.lock().unwrap().registers[address as usize] = value;
    }

    pub fn get(&self, address: u16) -> u16 {
        self.state.lock().unwrap().registers[address as usize]
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    async fn serve(
        mut framed: Framed<tokio::net::TcpStream, ServerCodec>,
        state: Arc<Mutex<ServerState>>,
    ) -> Result<()> {
        let mut handled = 0;

        while let Some(frame) = framed.next().await {
            let frame = frame?;
            handled += 1;

            let (reply, close) = {
                let mut state = state.lock().unwrap();
                state.requests += 1;
                if state.silent {
                    continue;
                }
                let transaction_id = if state.scramble_transaction {
                    frame.transaction_id.wrapping_add(100)
                } else {
                    frame.transaction_id
                };
                let pdu = Self::respond(&mut state, frame.pdu);
                let close = state.close_after.map(|n| handled >= n).unwrap_or(false);
                (Frame::new(transaction_id, frame.unit_id, pdu), close)
            };

            framed.send(reply).await?;
            if close {
                break;
            }
        }

        Ok(())
    }

    fn respond(state: &mut ServerState, request: Request) -> Response {
        let exception = |function, code| Response::Exception(ExceptionResponse { function, code });

        match request {
            Request::ReadHolding(r) => {
                let end = r.start as usize + r.count as usize;
                if end > state.registers.len() {
                    return exception(FunctionCode::ReadHolding, 0x02);
                }
                Response::ReadHolding(ReadHoldingResponse {
                    values: state.registers[r.start as usize..end].to_vec(),
                })
            }
            Request::WriteSingle(w) => {
                if let Some((address, code)) = state.reject {
                    if address == w.address {
                        return exception(FunctionCode::WriteSingle, code);
                    }
                }
                state.registers[w.address as usize] = w.value;
                Response::WriteSingle(w)
            }
            Request::WriteMultiple(w) => {
                for (i, value) in w.values.iter().enumerate() {
                    state.registers[w.address as usize + i] = *value;
                }
                Response::WriteMultiple(WriteMultipleResponse {
                    address: w.address,
                    count: w.values.len() as u16,
                })
            }
        }
    }
} // }}}
