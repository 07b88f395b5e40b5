//! Small helpers shared by the codec and protocol modules.
//!
//! Nothing in here is public; the helpers exist to keep the decoders'
//! validation code short.

/// Returns early with `$error` when `$predicate` does not hold.
///
/// Works like `assert!`, except that a failed check becomes an `Err` return
/// from the enclosing function instead of a panic. The limits of the header
/// and body decoders are enforced this way.
///
/// # Arguments
///
/// * `$predicate` - a boolean expression that must hold
/// * `$error` - the error returned when it does not
///
/// # Example
///
/// ```ignore
/// ensure!(header_count <= max_headers, ParseError::too_many_headers(header_count));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
