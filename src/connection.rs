//! One TCP connection to one heat pump controller.
//!
//! A [`Connection`] is owned by exactly one acquisition flow at a time and is
//! strictly request-response: a block read is only issued once the previous
//! one has completed. The controllers service one request at a time anyway,
//! so there is nothing to gain from pipelining here and a lot of quirks to
//! lose sleep over.

use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace};

use crate::modbus::{ModbusTcpCodec, Operation, Request, Response, ResponseKind};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("could not connect to `{1}` over TCP")]
    Connect(#[source] std::io::Error, String),
    #[error("timed out connecting to `{0}`")]
    ConnectTimeout(String),
    #[error("the connection is not established")]
    NotConnected,
    #[error("could not send out the request")]
    Send(#[source] std::io::Error),
    #[error("could not read data from the stream")]
    Receive(#[source] std::io::Error),
    #[error("the device closed the connection")]
    Disconnected,
    #[error("no response within {0}")]
    ResponseTimeout(humantime::Duration),
    #[error("the device responded with modbus exception code {0}")]
    Exception(u8),
    #[error("the device responded to function {0} with a different function")]
    FunctionMismatch(u8),
    #[error("the device returned {got} values where {want} were requested")]
    ShortResponse { want: u16, got: usize },
}

#[derive(clap::Parser, Clone)]
#[group(id = "connection::Args")]
pub struct Args {
    /// The address of the heat pump's modbus TCP endpoint, e.g. `10.0.0.12:502`.
    #[arg(long, short = 'a')]
    pub address: String,

    /// Consider a block read failed if the response does not arrive within
    /// this amount of time.
    #[arg(long, default_value = "5s")]
    pub read_timeout: humantime::Duration,

    /// Give up establishing the TCP session after this amount of time.
    #[arg(long, default_value = "10s")]
    pub connect_timeout: humantime::Duration,
}

type TcpIo = Framed<TcpStream, ModbusTcpCodec>;

pub struct Connection {
    args: Args,
    io: Option<TcpIo>,
    next_transaction_id: u16,
}

impl Connection {
    pub fn new(args: Args) -> Self {
        Self { args, io: None, next_transaction_id: 0 }
    }

    /// Establish the TCP session with the controller.
    ///
    /// Transport failures are logged and reported as `false` rather than
    /// propagated, so callers can branch without unwinding through error
    /// plumbing. Not cancel-safe against itself on the same instance.
    pub async fn connect(&mut self) -> bool {
        match self.establish().await {
            Ok(io) => {
                self.io = Some(io);
                true
            }
            Err(e) => {
                error!(
                    message = "could not connect",
                    address = self.args.address,
                    error = &e as &dyn std::error::Error
                );
                false
            }
        }
    }

    async fn establish(&self) -> Result<TcpIo, Error> {
        let address = &self.args.address;
        info!(message = "connecting...", address);
        let connect = async {
            let addresses = tokio::net::lookup_host(address)
                .await
                .map_err(|e| Error::LookupHost(e, address.clone()))?
                .collect::<Vec<_>>();
            debug!(message = "resolved", ?addresses);
            TcpStream::connect(&*addresses)
                .await
                .map_err(|e| Error::Connect(e, address.clone()))
        };
        let socket = tokio::time::timeout(*self.args.connect_timeout, connect)
            .await
            .map_err(|_| Error::ConnectTimeout(address.clone()))??;
        let nodelay_result = socket.set_nodelay(true);
        trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
        info!(message = "connected");
        Ok(Framed::new(socket, ModbusTcpCodec {}))
    }

    /// Release the connection. Safe to call in any state, any number of times.
    pub fn close(&mut self) {
        if self.io.take().is_some() {
            debug!(message = "closing connection", address = self.args.address);
        }
    }

    /// Read `count` consecutive holding registers starting at `address` from
    /// the given unit.
    pub async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<u16>, Error> {
        let operation = Operation::ReadHoldings { address, count };
        let response = self.transact(operation, unit_id).await?;
        match response.kind {
            ResponseKind::ErrorCode(code) => Err(Error::Exception(code)),
            ResponseKind::Holdings { words } => {
                if words.len() < usize::from(count) {
                    return Err(Error::ShortResponse { want: count, got: words.len() });
                }
                Ok(words)
            }
            ResponseKind::Coils { .. } => Err(Error::FunctionMismatch(operation.function_code())),
        }
    }

    /// Read `count` consecutive coils starting at `address` from the given
    /// unit.
    pub async fn read_coils(
        &mut self,
        address: u16,
        count: u16,
        unit_id: u8,
    ) -> Result<Vec<bool>, Error> {
        let operation = Operation::ReadCoils { address, count };
        let response = self.transact(operation, unit_id).await?;
        match response.kind {
            ResponseKind::ErrorCode(code) => Err(Error::Exception(code)),
            ResponseKind::Coils { mut bits } => {
                if bits.len() < usize::from(count) {
                    return Err(Error::ShortResponse { want: count, got: bits.len() });
                }
                // Coil payloads are padded out to whole bytes.
                bits.truncate(count.into());
                Ok(bits)
            }
            ResponseKind::Holdings { .. } => {
                Err(Error::FunctionMismatch(operation.function_code()))
            }
        }
    }

    async fn transact(&mut self, operation: Operation, unit_id: u8) -> Result<Response, Error> {
        let transaction_id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        let Some(io) = self.io.as_mut() else {
            return Err(Error::NotConnected);
        };
        let request = Request { unit_id, transaction_id, operation };
        io.send(&request).await.map_err(Error::Send)?;
        loop {
            let frame = tokio::time::timeout(*self.args.read_timeout, io.next())
                .await
                .map_err(|_| Error::ResponseTimeout(self.args.read_timeout))?;
            let response = match frame {
                None => return Err(Error::Disconnected),
                Some(frame) => frame.map_err(Error::Receive)?,
            };
            if response.transaction_id != transaction_id {
                // Left over from a read that previously timed out. Skip it.
                debug!(
                    message = "discarding stale response",
                    transaction = response.transaction_id,
                    expected = transaction_id
                );
                continue;
            }
            return Ok(response);
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    use super::*;

    fn test_args(address: String) -> Args {
        Args {
            address,
            read_timeout: "1s".parse().unwrap(),
            connect_timeout: "1s".parse().unwrap(),
        }
    }

    /// Accept one connection and answer every request from a scripted
    /// response builder keyed off the decoded request frame.
    async fn scripted_device(
        listener: tokio::net::TcpListener,
        respond: impl Fn(u16, u8, u8, u16, u16) -> Vec<u8> + Send + 'static,
    ) {
        let (mut socket, _) = listener.accept().await.unwrap();
        loop {
            let mut frame = [0u8; 12];
            if socket.read_exact(&mut frame).await.is_err() {
                return;
            }
            let transaction_id = u16::from_be_bytes([frame[0], frame[1]]);
            let (unit_id, function) = (frame[6], frame[7]);
            let address = u16::from_be_bytes([frame[8], frame[9]]);
            let count = u16::from_be_bytes([frame[10], frame[11]]);
            let response = respond(transaction_id, unit_id, function, address, count);
            socket.write_all(&response).await.unwrap();
        }
    }

    fn holding_response(transaction_id: u16, unit_id: u8, words: &[u16]) -> Vec<u8> {
        let byte_count = words.len() as u8 * 2;
        let mut out = transaction_id.to_be_bytes().to_vec();
        out.extend([0, 0]);
        out.extend((u16::from(byte_count) + 3).to_be_bytes());
        out.extend([unit_id, 3, byte_count]);
        out.extend(words.iter().flat_map(|w| w.to_be_bytes()));
        out
    }

    #[tokio::test]
    async fn connecting_to_an_unreachable_address_reports_false() {
        // Port 1 on localhost refuses connections in any sane environment.
        let mut connection = Connection::new(test_args("127.0.0.1:1".to_string()));
        assert!(!connection.connect().await);
        connection.close();
    }

    #[tokio::test]
    async fn close_is_safe_without_a_prior_connect() {
        let mut connection = Connection::new(test_args("127.0.0.1:1".to_string()));
        connection.close();
        connection.close();
    }

    #[tokio::test]
    async fn reads_fail_cleanly_when_not_connected() {
        let mut connection = Connection::new(test_args("127.0.0.1:1".to_string()));
        let result = connection.read_holding_registers(0, 100, 1).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn holding_register_reads_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::task::spawn(scripted_device(listener, |transaction_id, unit_id, function, _, _| {
            assert_eq!(function, 3);
            holding_response(transaction_id, unit_id, &[10, 0xFFFF, 0x8000])
        }));
        let mut connection = Connection::new(test_args(address));
        assert!(connection.connect().await);
        let words = connection.read_holding_registers(5001, 3, 1).await.unwrap();
        assert_eq!(words, [10, 0xFFFF, 0x8000]);
        connection.close();
    }

    #[tokio::test]
    async fn coil_reads_round_trip_and_truncate_padding() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::task::spawn(scripted_device(listener, |transaction_id, unit_id, function, _, _| {
            assert_eq!(function, 1);
            let mut out = transaction_id.to_be_bytes().to_vec();
            out.extend([0, 0, 0, 5, unit_id, 1, 2]);
            out.extend([0b0000_0011, 0b0000_0001]);
            out
        }));
        let mut connection = Connection::new(test_args(address));
        assert!(connection.connect().await);
        let bits = connection.read_coils(0, 10, 1).await.unwrap();
        assert_eq!(bits.len(), 10);
        assert_eq!(&bits[..3], &[true, true, false]);
        assert!(bits[8]);
        connection.close();
    }

    #[tokio::test]
    async fn device_exceptions_propagate_as_errors() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::task::spawn(scripted_device(listener, |transaction_id, unit_id, _, _, _| {
            let mut out = transaction_id.to_be_bytes().to_vec();
            out.extend([0, 0, 0, 3, unit_id, 0x83, 2]);
            out
        }));
        let mut connection = Connection::new(test_args(address));
        assert!(connection.connect().await);
        let result = connection.read_holding_registers(0, 100, 1).await;
        assert!(matches!(result, Err(Error::Exception(2))));
    }
}
