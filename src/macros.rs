// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Macros shared by the wire conversion code.

/// Implements `TryFrom<u32>` for an enum deriving `enumn::N`.
///
/// Values coming from the guest that do not name a variant are a request-level error, so the
/// conversion yields `VideoError::InvalidParameter` and the command gets an error response.
macro_rules! impl_try_from_u32_for_enumn {
    ($ty:ty, $name:literal) => {
        impl TryFrom<u32> for $ty {
            type Error = $crate::error::VideoError;

            fn try_from(v: u32) -> Result<Self, Self::Error> {
                Self::n(v).ok_or_else(|| {
                    ::log::error!(concat!("invalid ", $name, ": {}"), v);
                    $crate::error::VideoError::InvalidParameter
                })
            }
        }

        impl TryFrom<$crate::protocol::Le32> for $ty {
            type Error = $crate::error::VideoError;

            fn try_from(v: $crate::protocol::Le32) -> Result<Self, Self::Error> {
                Self::try_from(v.get())
            }
        }
    };
}

/// Implements `From` in both directions between a wire struct and its native counterpart whose
/// fields convert into each other.
macro_rules! impl_from_for_interconvertible_structs {
    ($t1:ident, $t2:ident, $($v:ident),+) => {
        impl_from_for_interconvertible_structs_core!($t1, $t2, $( $v ),+ );
        impl_from_for_interconvertible_structs_core!($t2, $t1, $( $v ),+ );
    };
}

macro_rules! impl_from_for_interconvertible_structs_core {
    ($t1:ident, $t2:ident, $($v:ident),+) => {
        impl From<$t1> for $t2 {
            #[allow(clippy::needless_update)]
            fn from(x: $t1) -> Self {
                $t2 {
                    $( $v: x.$v.into(), )+
                    ..Default::default() // for paddings
                }
            }
        }
    };
}
