mod bootstrap;
mod demo_engine;
mod keymap;
mod loop_runner;
mod replay;
mod touch;

pub(crate) use bootstrap::{build_app, init_tracing};
pub(crate) use loop_runner::run;
