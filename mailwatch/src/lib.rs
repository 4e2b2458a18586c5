#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![doc = include_str!("../README.md")]

pub mod config;
pub mod dispatch;
pub mod envelope;
mod error;
pub mod event;
pub mod monitor;
pub mod retry;
pub mod session;
pub mod tracker;
pub mod watcher;

#[doc(inline)]
pub use self::{
    error::{AnyBoxedError, AnyError, AnyResult, Error, Result},
    watcher::{WatchHandle, WatchState, Watcher, WatcherBuilder},
};
