// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod enrichment;
pub mod errors;
pub mod event;
pub mod follow;
pub mod geolocation;
pub mod parser;
pub mod reader;

pub use enrichment::{Enrichment, EnrichmentChain};
pub use errors::{EnrichmentError, Error, ParseError};
pub use event::{Country, FailedConnEvent, SourceAddress, UNKNOWN_COUNTRY};
pub use parser::{Dialect, Parser};
pub use reader::{Backpressure, FileReader, ReaderConfig, ReaderHandle, ReaderStatus};
