//! Instruction dispatch for the robot side of the protocol
//!
//! Each handler takes the session and the decoded payload and returns the
//! reply payload to send, if any, plus the detection events it raised. Only
//! GetSerial has a precondition (a prior successful handshake); the other
//! instructions are accepted in any order.

use tracing::{info, warn};

use super::constants::{
    status, Instruction, HANDSHAKE_PASSPHRASE, HANDSHAKE_RESERVED_LEN, MAX_PAYLOAD_LEN,
};
use super::packet::Packet;
use super::session::{contains_injection_marker, injected_command, Session, WifiConfig, WifiMode};
use crate::error::ProtocolError;

/// Response to send back for one instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub instruction: Instruction,
    pub payload: Vec<u8>,
}

impl Reply {
    fn status(instruction: Instruction, code: u8) -> Self {
        Self {
            instruction,
            payload: vec![code],
        }
    }

    pub fn success(instruction: Instruction) -> Self {
        Self::status(instruction, status::SUCCESS)
    }

    pub fn failure(instruction: Instruction) -> Self {
        Self::status(instruction, status::FAILURE)
    }

    pub fn is_success(&self) -> bool {
        self.payload == [status::SUCCESS]
    }
}

/// Observations raised while handling an instruction; never affect replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Authenticated { success: bool },
    SerialRequested { authorized: bool },
    WifiModeSelected(WifiMode),
    SsidReceived(String),
    PasswordReceived(String),
    InjectionSuspected {
        password: String,
        injected_command: Option<String>,
    },
    ConfigurationApplied(WifiConfig),
}

/// What one instruction produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// `None` means the peer must not expect a response
    pub reply: Option<Reply>,
    pub events: Vec<SessionEvent>,
}

impl Outcome {
    fn reply(reply: Reply) -> Self {
        Self {
            reply: Some(reply),
            events: Vec::new(),
        }
    }

    fn silent() -> Self {
        Self::default()
    }

    fn with_event(mut self, event: SessionEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// Robot-side instruction handlers
#[derive(Debug, Clone)]
pub struct InstructionHandler {
    serial: String,
}

impl InstructionHandler {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }

    pub fn dispatch(&self, session: &mut Session, packet: &Packet) -> Outcome {
        self.handle(session, packet.instruction, &packet.payload)
    }

    pub fn handle(&self, session: &mut Session, instruction: Instruction, payload: &[u8]) -> Outcome {
        match instruction {
            Instruction::Handshake => handshake(session, payload),
            Instruction::GetSerial => self.get_serial(session),
            Instruction::InitWifi => init_wifi(session, payload),
            Instruction::SetSsid => set_ssid(session, payload),
            Instruction::SetPassword => set_password(session, payload),
            Instruction::SetCountry => set_country(session, payload),
        }
    }

    fn get_serial(&self, session: &Session) -> Outcome {
        if !session.authenticated {
            let err = ProtocolError::Precondition {
                instruction: Instruction::GetSerial,
                reason: "not authenticated",
            };
            warn!("{}", err);
            return Outcome::reply(Reply::failure(Instruction::GetSerial))
                .with_event(SessionEvent::SerialRequested { authorized: false });
        }

        info!("Returning serial: {}", self.serial);

        // Always one chunk: [index=1, total=1, serial...]
        let mut payload = vec![0x01, 0x01];
        let max_serial = MAX_PAYLOAD_LEN - payload.len();
        payload.extend(self.serial.bytes().take(max_serial));

        Outcome::reply(Reply {
            instruction: Instruction::GetSerial,
            payload,
        })
        .with_event(SessionEvent::SerialRequested { authorized: true })
    }
}

fn handshake(session: &mut Session, payload: &[u8]) -> Outcome {
    let passphrase = payload.get(HANDSHAKE_RESERVED_LEN..).unwrap_or_default();
    let success = passphrase == HANDSHAKE_PASSPHRASE;

    session.authenticated = success;
    if success {
        info!("✅ Authentication successful");
    } else {
        warn!(
            "❌ Authentication failed (received '{}')",
            String::from_utf8_lossy(passphrase)
        );
    }

    let reply = if success {
        Reply::success(Instruction::Handshake)
    } else {
        Reply::failure(Instruction::Handshake)
    };
    Outcome::reply(reply).with_event(SessionEvent::Authenticated { success })
}

fn init_wifi(session: &mut Session, payload: &[u8]) -> Outcome {
    let mut outcome = Outcome::reply(Reply::success(Instruction::InitWifi));

    if let Some(&mode) = payload.first() {
        let mode = WifiMode::from_u8(mode);
        info!("WiFi mode: {}", mode);
        session.wifi_mode = Some(mode);
        outcome = outcome.with_event(SessionEvent::WifiModeSelected(mode));
    }

    outcome
}

fn set_ssid(session: &mut Session, payload: &[u8]) -> Outcome {
    match session.ssid_chunks.push(payload) {
        Ok(Some(bytes)) => {
            session.ssid = String::from_utf8_lossy(&bytes).into_owned();
            info!("✅ Complete SSID received: '{}'", session.ssid);
            Outcome::reply(Reply::success(Instruction::SetSsid))
                .with_event(SessionEvent::SsidReceived(session.ssid.clone()))
        }
        // Intermediate chunks are never acknowledged
        Ok(None) => Outcome::silent(),
        Err(e) => {
            warn!("SetSsid chunk rejected: {}", e);
            Outcome::reply(Reply::failure(Instruction::SetSsid))
        }
    }
}

fn set_password(session: &mut Session, payload: &[u8]) -> Outcome {
    match session.password_chunks.push(payload) {
        Ok(Some(bytes)) => {
            session.password = String::from_utf8_lossy(&bytes).into_owned();
            info!("✅ Complete password received: '{}'", session.password);

            let mut outcome = Outcome::reply(Reply::success(Instruction::SetPassword))
                .with_event(SessionEvent::PasswordReceived(session.password.clone()));

            if contains_injection_marker(&session.password) {
                warn!("⚠️ Command injection detected in password: {}", session.password);
                outcome = outcome.with_event(SessionEvent::InjectionSuspected {
                    password: session.password.clone(),
                    injected_command: injected_command(&session.password).map(str::to_owned),
                });
            }

            outcome
        }
        Ok(None) => Outcome::silent(),
        Err(e) => {
            warn!("SetPassword chunk rejected: {}", e);
            Outcome::reply(Reply::failure(Instruction::SetPassword))
        }
    }
}

fn set_country(session: &mut Session, payload: &[u8]) -> Outcome {
    // The first payload byte is reserved; the country code follows, NUL padded
    let country: Vec<u8> = payload
        .iter()
        .skip(1)
        .copied()
        .filter(|&b| b != 0x00)
        .collect();
    session.country = String::from_utf8_lossy(&country).into_owned();

    let config = session.wifi_config();
    info!(
        "📶 WiFi configuration triggered: ssid='{}' password='{}' country='{}'",
        config.ssid, config.password, config.country
    );
    info!("Would execute: {}", config.simulated_command());
    if let Some(command) = injected_command(&config.password) {
        warn!("⚠️ Injected command would execute as root: {}", command);
    }

    Outcome::reply(Reply::success(Instruction::SetCountry))
        .with_event(SessionEvent::ConfigurationApplied(config))
}
