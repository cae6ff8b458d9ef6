//! Error type shared by every stage of the dispatch lifecycle.
//!
//! Two kinds are fatal for a batch run: the host/device combination cannot
//! run the workload at all ([`ErrorKind::Unsupported`]), or the driver
//! rejected a creation/submission call ([`ErrorKind::ApiFailure`]). A bounded
//! wait that expires is reported separately as [`ErrorKind::TimedOut`], and
//! contract violations by the caller as [`ErrorKind::Usage`].

use ash::vk;
use thiserror::Error;

pub type Result<T, E = ComputeError> = std::result::Result<T, E>;

/// Coarse classification of a [`ComputeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No memory type, queue family or dispatch shape matches the request.
    Unsupported,
    /// The Vulkan implementation rejected a call.
    ApiFailure,
    /// A bounded completion wait expired before the device signalled.
    TimedOut,
    /// The caller broke an API contract (undeclared binding, wrong order, ...).
    Usage,
}

/// What a capability lookup was searching for when it came up empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnsupportedError {
    #[error("no memory type in bits {type_bits:#b} has properties {required:?}")]
    MemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("no queue family supports {required:?}")]
    QueueFamily { required: vk::QueueFlags },

    #[error("no physical device reported by the Vulkan instance")]
    NoPhysicalDevice,

    #[error("dispatch of {groups} workgroups exceeds device limits {limits:?}")]
    DispatchTooLarge { groups: u64, limits: [u32; 3] },
}

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("unsupported device: {0}")]
    Unsupported(#[from] UnsupportedError),

    #[error("failed to load the Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("memory allocator error: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("invalid shader binary: {0}")]
    InvalidShader(String),

    #[error("shader has no compute entry point named {0:?}")]
    MissingEntryPoint(String),

    #[error("descriptor pool exhausted: requested {requested} descriptors in set #{set}, {available} left")]
    DescriptorPoolExhausted {
        requested: u32,
        available: u32,
        set: u32,
    },

    #[error("binding {binding}[{element}] is not declared in the set layout")]
    UndeclaredBinding { binding: u32, element: u32 },

    #[error("binding {binding}[{element}] was never written")]
    IncompleteDescriptorSet { binding: u32, element: u32 },

    #[error("invalid binding layout: {0}")]
    InvalidLayout(String),

    #[error("submission cannot move from {from} to {to}")]
    InvalidState {
        from: &'static str,
        to: &'static str,
    },

    #[error("buffer holds {expected} elements, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("range {offset}..{end} lies outside a buffer of {size} bytes")]
    RangeOutOfBounds { offset: u64, end: u64, size: u64 },

    #[error("buffer memory is not host visible")]
    NotMappable,

    #[error("cannot create a buffer with zero elements")]
    EmptyBuffer,

    #[error("nothing to dispatch: element count is zero")]
    EmptyDispatch,

    #[error("element {index}: expected {expected}, got {actual}")]
    Mismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("device did not finish within {0:?}")]
    Timeout(std::time::Duration),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("statistics serialisation failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl ComputeError {
    /// Wraps a raw `vk::Result` with the name of the call that produced it.
    pub fn vulkan(call: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Vulkan { call, result }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Timeout(_) => ErrorKind::TimedOut,
            Self::UndeclaredBinding { .. }
            | Self::IncompleteDescriptorSet { .. }
            | Self::InvalidLayout(_)
            | Self::InvalidState { .. }
            | Self::LengthMismatch { .. }
            | Self::RangeOutOfBounds { .. }
            | Self::NotMappable
            | Self::EmptyBuffer
            | Self::EmptyDispatch => ErrorKind::Usage,
            Self::Loader(_)
            | Self::Vulkan { .. }
            | Self::Allocation(_)
            | Self::InvalidShader(_)
            | Self::MissingEntryPoint(_)
            | Self::DescriptorPoolExhausted { .. }
            | Self::Mismatch { .. }
            | Self::Io(_)
            | Self::Json(_) => ErrorKind::ApiFailure,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unsupported | ErrorKind::ApiFailure)
    }
}
