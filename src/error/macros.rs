//! Internal error handling macros.

/// Displays a runtime error message and aborts the program.
///
/// Use this for unrecoverable errors that indicate bugs in the runtime
/// implementation itself. The program prints a diagnostic message and
/// immediately aborts without unwinding.
///
/// # Examples
///
/// ```ignore
/// if prev == node {
///   fatal!("corrupt mailbox");
/// }
/// ```
macro_rules! fatal {
  ($error:expr) => {{
    ::std::eprintln!(
      "{}:{}: a runtime invariant has been broken: {}",
      ::std::file!(),
      ::std::line!(),
      $error,
    );

    ::std::process::abort();
  }};
}

pub(crate) use fatal;
