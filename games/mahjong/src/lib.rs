//! Synchronous-round mahjong (§4.8): one hand's draw/discard/call cycle
//! (`round`), its supporting entities (`tile`, `furu`, `river`, `dora`,
//! `yama`, `player`, `action`) and scoring (`scoring`), wired into the
//! engine's [`engine_core::game_module::GameModule`] /
//! [`engine_core::stage::AtomicLogic`] abstractions by `game`.

pub mod action;
pub mod dora;
pub mod furu;
pub mod game;
pub mod player;
pub mod river;
pub mod round;
pub mod scoring;
pub mod tile;
pub mod yama;

pub use game::MahjongModule;
