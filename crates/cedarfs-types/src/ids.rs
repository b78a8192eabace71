//! Strongly-typed identifiers.
//!
//! Chunk ids are allocated monotonically by the master and show up
//! everywhere in logs and repair tooling as fixed-width hex, so `ChunkId`
//! displays as 16 hex digits. A `ServerId` is an opaque handle minted by
//! the chunkserver registry; it has no on-the-wire meaning outside one
//! master process and displays as a plain number.

/// Newtype wrapper for an id, with `Deref`, conversions from/to the inner
/// type, ordering, hashing, and transparent serde.
///
/// The `display` argument picks how the id renders in log fields:
/// `plain` for decimal, `hex16` for a fixed 16-digit uppercase form.
macro_rules! strong_type {
    ($name:ident, $inner:ty, plain) => {
        strong_type!(@define $name, $inner);

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
    ($name:ident, $inner:ty, hex16) => {
        strong_type!(@define $name, $inner);

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({:016X})", stringify!($name), self.0)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{:016X}", self.0)
            }
        }
    };
    (@define $name:ident, $inner:ty) => {
        #[derive(
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Default,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub $inner);

        impl ::std::ops::Deref for $name {
            type Target = $inner;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(val: $inner) -> Self {
                Self(val)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(val: $name) -> Self {
                val.0
            }
        }
    };
}

strong_type!(ChunkId, u64, hex16);
strong_type!(ServerId, u32, plain);
