// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Error types.

/// An error carried by an `on_error` signal. Business errors travel through the pipeline as-is.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures raised by the stream bridges themselves, never by the decorated producer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FluxError {
    /// The source needs an async runtime to drive it and none was entered.
    #[error("no tokio runtime is available to drive the stream")]
    NoRuntime,
}
