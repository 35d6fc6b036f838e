//! Protocol communicators
//!
//! One communicator per supported protocol. `Communicators` owns all of
//! them and resolves a signature's protocol to its handler.

pub mod dicom;
pub mod http;
pub mod socket;
pub mod ssh;
pub mod telnet;

use honeysift_common::{CommunicatorOptions, CommunicatorSource, ProbeResult, Protocol, ProtocolCommunicator};

pub use dicom::DicomCommunicator;
pub use http::HttpCommunicator;
pub use socket::SocketCommunicator;
pub use ssh::{SshCommunicator, SshConnector, SshShell};
pub use telnet::{TelnetCommunicator, TelnetDecoder, TelnetSession};

/// Complete set of communicators, one per protocol.
pub struct Communicators {
    socket: SocketCommunicator,
    ssh: SshCommunicator,
    telnet: TelnetCommunicator,
    http: HttpCommunicator,
    https: HttpCommunicator,
    dicom: DicomCommunicator,
}

impl Communicators {
    pub fn new(options: &CommunicatorOptions) -> ProbeResult<Self> {
        Ok(Self {
            socket: SocketCommunicator::new(options),
            ssh: SshCommunicator::new(options),
            telnet: TelnetCommunicator::new(options),
            http: HttpCommunicator::new(options, false)?,
            https: HttpCommunicator::new(options, true)?,
            dicom: DicomCommunicator::new(options),
        })
    }
}

impl CommunicatorSource for Communicators {
    fn communicator_for(&self, protocol: Protocol) -> &dyn ProtocolCommunicator {
        match protocol {
            Protocol::Socket => &self.socket,
            Protocol::Ssh => &self.ssh,
            Protocol::Telnet => &self.telnet,
            Protocol::Http => &self.http,
            Protocol::Https => &self.https,
            Protocol::Dicom => &self.dicom,
        }
    }
}
