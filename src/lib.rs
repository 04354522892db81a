//! # stem-splitter-server
//!
//! HTTP service that takes an encoded audio file, runs it through an
//! external stem-separation model and returns the requested stem together
//! with a mix of everything else.

pub mod config;
pub mod core;
pub mod error;
pub mod io;
pub mod logging;
pub mod server;
pub mod types;

pub use crate::{
    config::ServiceConfig,
    core::{
        audio::{load_and_mix, probe_audio, read_audio, write_audio, write_to_workspace, AudioProbe},
        encoder::{encode_to_container, OutputPolicy, MP3_CONTENT_TYPE},
        pipeline::{InputLimits, Pipeline, Stage, ValidatedRequest},
        separator::{DemucsSeparator, Separator},
        workspace::{Workspace, WorkspaceManager},
    },
    error::{Result, SeparationError},
    types::{
        AudioData, SeparatedTracks, SeparationOutputSet, SeparationRequest, SeparationResult,
        StemFile,
    },
};
