//! Robot configuration protocol
//!
//! Framing and codec shared by both roles, chunk reassembly, the per-connection
//! session and instruction state machine, and the two role adapters.

pub mod chunks;
pub mod constants;
pub mod handler;
pub mod initiator;
pub mod packet;
pub mod responder;
pub mod session;

pub use chunks::{split_chunks, split_default, Chunk, ChunkOrdering, Reassembler};
pub use constants::{Instruction, Opcode, Role};
pub use handler::{InstructionHandler, Outcome, Reply, SessionEvent};
pub use initiator::{Harvest, Initiator, InitiatorTimeouts};
pub use packet::{Packet, PacketCodec};
pub use responder::{LinkEvent, Notifier, Responder, ResponderEvent};
pub use session::{injected_command, Session, WifiConfig, WifiMode};
