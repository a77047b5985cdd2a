pub mod config;
pub mod decoder;
pub mod device;
pub mod disasm;
pub mod encoder;
pub mod envelope;
pub mod error;
pub mod instructions;
pub mod program;
pub mod pulse;
pub mod regs;
pub mod script;
pub mod sim;
pub mod wave;

pub mod isa {
    pub mod tproc64; // 64-bit word, opcode in the top byte
}

pub use config::SocConfig;
pub use encoder::Binary;
pub use error::{Error, Result};
pub use program::{ChannelId, Program, Time};
pub use pulse::{PulseParams, PulseStyle};
