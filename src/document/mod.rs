//! The configuration engine: a spanned document tree with two front-ends
//! (JSON and the block recipe format) and declarative binding of documents
//! onto typed records.

pub mod binder;
pub mod duration;
pub mod error;
pub mod json;
pub mod merge;
pub mod node;
pub mod sdl;

pub use binder::{bind_record, BindContext, BindRecord, Binder, FromDocument, StrictMode};
pub use error::{BindError, BindErrorWithSource, BindResult, DocumentError};
pub use json::parse_json;
pub use merge::{merge_unique, Merge};
pub use node::{Mapping, Node, Scalar, ScalarStyle, Sequence};
pub use sdl::{parse_sdl, SdlAttribute, SdlTag};

pub(crate) use binder::{impl_from_document_record, impl_from_document_scalar};

/// A value carrying a "was explicitly set" flag.
///
/// Unlike an `Option`, the value is always present; the flag distinguishes a
/// retained default from a default the document spelled out. Priority
/// merging lets an explicitly-set lower layer survive an unset higher one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetInfo<T> {
    pub value: T,
    set: bool,
}

impl<T> SetInfo<T> {
    /// Wrap a value the document provided.
    pub fn explicit(value: T) -> Self {
        Self { value, set: true }
    }

    /// Wrap a default that was not spelled out.
    pub fn implicit(value: T) -> Self {
        Self { value, set: false }
    }

    pub fn is_set(&self) -> bool {
        self.set
    }

    /// The value when set, else the given fallback.
    pub fn or(&self, fallback: T) -> T
    where
        T: Clone,
    {
        if self.set {
            self.value.clone()
        } else {
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_info_distinguishes_explicit_default() {
        let implicit: SetInfo<u32> = SetInfo::default();
        let explicit = SetInfo::explicit(0);
        assert_eq!(implicit.value, explicit.value);
        assert!(!implicit.is_set());
        assert!(explicit.is_set());
        assert_eq!(implicit.or(7), 7);
        assert_eq!(explicit.or(7), 0);
    }
}
