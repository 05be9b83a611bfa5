//! Grammar level rewriters.
//!
//! Contains the decoder configuration rewriter with its extension handling,
//! profile level values, the MHAS packet codec and the audio pre-roll
//! rewriter used for immediate playout frames.

pub mod config;
pub mod config_extension;
pub mod packet;
pub mod preroll;
pub mod profile_level;
