//! DICOM communicator
//!
//! Each step becomes a Patient Root C-GET with the step input as PatientID.
//! The final (non-pending) C-GET-RSP status is rendered as text and
//! compared against the step's expected output. All steps of a signature
//! set share one association.

pub mod pdu;

use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

use honeysift_common::{
    CommunicatorOptions, ProbeError, ProbeResult, Protocol, ProtocolCommunicator, SignatureStep,
    StepOutcome, StepRun,
};

use crate::matcher::matches_step;
use pdu::{command, Pdu};

pub struct DicomCommunicator {
    calling_ae: String,
    called_ae: String,
    connect_timeout: Duration,
    acse_timeout: Duration,
    dimse_timeout: Duration,
}

impl DicomCommunicator {
    pub fn new(options: &CommunicatorOptions) -> Self {
        Self {
            calling_ae: options.dicom_calling_ae.clone(),
            called_ae: options.dicom_called_ae.clone(),
            connect_timeout: options.connect_timeout(),
            acse_timeout: options.dicom_acse_timeout(),
            dimse_timeout: options.dicom_dimse_timeout(),
        }
    }

    /// Connect and negotiate. Any failure here means the port is not a
    /// usable DICOM peer, which is reported as a service mismatch.
    async fn associate(&self, addr: SocketAddr) -> ProbeResult<TcpStream> {
        let mut stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProbeError::timeout(format!("connect to {addr}")))??;

        let negotiation = async {
            stream
                .write_all(&pdu::associate_rq(&self.calling_ae, &self.called_ae))
                .await?;
            pdu::read_pdu(&mut stream).await
        };
        let reply = timeout(self.acse_timeout, negotiation)
            .await
            .map_err(|_| ProbeError::ServiceMismatch("no association response".into()))?
            .map_err(|e| ProbeError::ServiceMismatch(format!("association failed: {e}")))?;

        match reply {
            Pdu::AssociateAc { accepted: true } => Ok(stream),
            Pdu::AssociateAc { accepted: false } => Err(ProbeError::ServiceMismatch(
                "presentation context rejected".into(),
            )),
            Pdu::AssociateRj { result, source, reason } => Err(ProbeError::ServiceMismatch(
                format!("association rejected (result {result}, source {source}, reason {reason})"),
            )),
            other => Err(ProbeError::ServiceMismatch(format!(
                "unexpected reply to association request: {other:?}"
            ))),
        }
    }

    /// Send one C-GET and wait for its final status.
    async fn c_get(&self, stream: &mut TcpStream, message_id: u16, patient_id: &str) -> ProbeResult<u16> {
        timeout(self.dimse_timeout, stream.write_all(&pdu::c_get_rq(message_id, patient_id)))
            .await
            .map_err(|_| ProbeError::timeout("C-GET request write"))??;

        let mut fragments = Vec::new();
        loop {
            let reply = timeout(self.dimse_timeout, pdu::read_pdu(stream))
                .await
                .map_err(|_| ProbeError::timeout("C-GET response"))??;

            let pdvs = match reply {
                Pdu::PData(pdvs) => pdvs,
                Pdu::Abort { source, reason } => {
                    return Err(ProbeError::ConnectionReset(format!(
                        "association aborted (source {source}, reason {reason})"
                    )))
                }
                other => {
                    return Err(ProbeError::protocol(format!(
                        "unexpected PDU during C-GET: {other:?}"
                    )))
                }
            };

            let commands = pdvs
                .into_iter()
                .filter(|p| p.is_command && p.context_id == pdu::PRESENTATION_CONTEXT_ID);
            for pdv in commands {
                fragments.extend_from_slice(&pdv.data);
                if !pdv.is_last {
                    continue;
                }
                let command_set = pdu::parse_command(&fragments)?;
                fragments.clear();

                if command_set.command_field != Some(command::C_GET_RSP) {
                    debug!("Ignoring DIMSE command {:?}", command_set.command_field);
                    continue;
                }
                if command_set.message_id_responded != Some(message_id) {
                    debug!(
                        "Ignoring C-GET-RSP for message {:?}, waiting on {}",
                        command_set.message_id_responded, message_id
                    );
                    continue;
                }
                if command_set.is_pending() {
                    continue;
                }
                return command_set
                    .status
                    .ok_or_else(|| ProbeError::protocol("C-GET-RSP without status"));
            }
        }
    }

    async fn release(&self, stream: &mut TcpStream) {
        let sent = timeout(self.acse_timeout, stream.write_all(&pdu::release_rq())).await;
        if matches!(sent, Ok(Ok(()))) {
            let _ = timeout(self.acse_timeout, pdu::read_pdu(stream)).await;
        }
        let _ = timeout(self.acse_timeout, stream.shutdown()).await;
    }
}

#[async_trait]
impl ProtocolCommunicator for DicomCommunicator {
    #[instrument(skip(self, steps), fields(steps = steps.len()))]
    async fn execute(&self, host: IpAddr, port: u16, steps: &[SignatureStep]) -> StepRun {
        let mut stream = match self.associate(SocketAddr::new(host, port)).await {
            Ok(stream) => stream,
            Err(e) => return StepRun::failed(e),
        };
        info!("DICOM association established with {}:{}", host, port);

        let mut outcomes = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            let patient_id = String::from_utf8_lossy(step.input.as_bytes()).into_owned();
            let message_id = (index as u16).wrapping_add(1);

            match self.c_get(&mut stream, message_id, &patient_id).await {
                Ok(status) => {
                    let rendered = pdu::render_status(status);
                    let matched = matches_step(step, rendered.as_bytes());
                    debug!("C-GET {} -> status 0x{:04X}, matched={}", index, status, matched);
                    outcomes.push(StepOutcome::new(index, matched, rendered.into_bytes()));
                }
                Err(e) => return StepRun::aborted(outcomes, e),
            }
        }

        self.release(&mut stream).await;
        StepRun::completed(outcomes)
    }

    fn protocol(&self) -> Protocol {
        Protocol::Dicom
    }
}
