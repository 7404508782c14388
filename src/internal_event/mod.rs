//! Observable engine events.
//!
//! Each event records its metrics through the `metrics` facade and writes the
//! matching `tracing` line, so exporters and logs always agree. Events on the
//! admission path are registered once per rule with [`registered_event!`] and keep
//! their metric handles; the rest are emitted ad hoc with [`emit!`].

mod circuit_breaker;
mod flow_control;

pub use circuit_breaker::*;
pub use flow_control::*;

pub trait InternalEvent: Sized {
    fn emit(self);
}

/// Emits an [`InternalEvent`].
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::internal_event::InternalEvent::emit($event)
    };
}

/// An event whose metric handles were registered up front.
pub trait InternalEventHandle {
    type Data;

    fn emit(&self, data: Self::Data);
}

/// Declares a registered event: its labels, the metric handles built from them in
/// `register`, and how one occurrence is recorded.
#[macro_export]
macro_rules! registered_event {
    (
        $event:ident { $($label:ident: $label_ty:ty),* $(,)? } => {
            $($field:ident: $type:ty = $value:expr,)*
        }

        fn emit(&$slf:ident, $data_name:ident: $data:ty) $emit_body:block
    ) => {
        #[derive(Clone)]
        pub struct $event {
            $($label: $label_ty,)*
            $($field: $type,)*
        }

        impl $event {
            pub fn register($($label: $label_ty),*) -> Self {
                $(let $field: $type = $value;)*
                Self {
                    $($label,)*
                    $($field,)*
                }
            }
        }

        impl ::std::fmt::Debug for $event {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.debug_struct(stringify!($event))
                    $(.field(stringify!($label), &self.$label))*
                    .finish_non_exhaustive()
            }
        }

        impl $crate::internal_event::InternalEventHandle for $event {
            type Data = $data;

            fn emit(&$slf, $data_name: $data) $emit_body
        }
    };
}
