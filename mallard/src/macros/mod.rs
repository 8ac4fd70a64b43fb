//! # Call-Site Macros
//!
//! The logging macros: per-level shorthands, the binary `log_cached!`
//! variant that interns its template once per call-site, and the composed
//! guards `log_once!`, `log_once_thread!`, `log_every_n!` and
//! `log_moderate!`, each owning static state scoped to the call-site.

/// Emits a record at an explicit level.
///
/// ```ignore
/// log_with!(logger, LogLevel::INFO, "loaded {} rules", count);
/// ```
#[macro_export]
macro_rules! log_with {
  ($logger:expr, $level:expr, $($arg:tt)*) => {{
    let logger = &$logger;
    let level = $level;
    if logger.can_log(level) {
      logger.log_fmt(level, $crate::callsite!(), format_args!($($arg)*));
    }
  }};
}

#[macro_export]
macro_rules! fatal {
  ($logger:expr, $($arg:tt)*) => {
    $crate::log_with!($logger, $crate::record::LogLevel::FATAL, $($arg)*)
  };
}

#[macro_export]
macro_rules! error {
  ($logger:expr, $($arg:tt)*) => {
    $crate::log_with!($logger, $crate::record::LogLevel::ERROR, $($arg)*)
  };
}

#[macro_export]
macro_rules! warn {
  ($logger:expr, $($arg:tt)*) => {
    $crate::log_with!($logger, $crate::record::LogLevel::WARN, $($arg)*)
  };
}

#[macro_export]
macro_rules! notice {
  ($logger:expr, $($arg:tt)*) => {
    $crate::log_with!($logger, $crate::record::LogLevel::NOTICE, $($arg)*)
  };
}

#[macro_export]
macro_rules! info {
  ($logger:expr, $($arg:tt)*) => {
    $crate::log_with!($logger, $crate::record::LogLevel::INFO, $($arg)*)
  };
}

#[macro_export]
macro_rules! trace {
  ($logger:expr, $($arg:tt)*) => {
    $crate::log_with!($logger, $crate::record::LogLevel::TRACE, $($arg)*)
  };
}

#[macro_export]
macro_rules! debug {
  ($logger:expr, $($arg:tt)*) => {
    $crate::log_with!($logger, $crate::record::LogLevel::DEBUG, $($arg)*)
  };
}

#[macro_export]
macro_rules! diag {
  ($logger:expr, $($arg:tt)*) => {
    $crate::log_with!($logger, $crate::record::LogLevel::DIAG, $($arg)*)
  };
}

/// Binary logging: the template is interned exactly once per call-site and
/// the arguments travel encoded; formatting happens at the target.
///
/// ```ignore
/// log_cached!(logger, LogLevel::INFO, "request {} took {}ms", req_id, elapsed);
/// ```
#[macro_export]
macro_rules! log_cached {
  ($logger:expr, $level:expr, $template:literal $(, $arg:expr)* $(,)?) => {{
    let logger = &$logger;
    let level = $level;
    if logger.can_log(level) {
      static TEMPLATE_ID: ::std::sync::atomic::AtomicU32 =
        ::std::sync::atomic::AtomicU32::new($crate::msg_cache::INVALID_TEMPLATE_ID);
      let mut template_id = TEMPLATE_ID.load(::std::sync::atomic::Ordering::Relaxed);
      if template_id == $crate::msg_cache::INVALID_TEMPLATE_ID {
        template_id = logger.msg_cache().get_or_cache($template);
        TEMPLATE_ID.store(template_id, ::std::sync::atomic::Ordering::Relaxed);
      }
      let mut encoded = ::std::vec::Vec::new();
      let mut arg_count: u16 = 0;
      $(
        $crate::codec::Encodable::encode_arg(&$arg, &mut encoded);
        arg_count += 1;
      )*
      logger.log_binary(level, $crate::callsite!(), template_id, encoded, arg_count);
    }
  }};
}

/// Passes exactly once for the whole process.
#[macro_export]
macro_rules! log_once {
  ($logger:expr, $level:expr, $($arg:tt)*) => {{
    static FIRED: ::std::sync::atomic::AtomicBool = ::std::sync::atomic::AtomicBool::new(false);
    if FIRED
      .compare_exchange(
        false,
        true,
        ::std::sync::atomic::Ordering::SeqCst,
        ::std::sync::atomic::Ordering::Relaxed,
      )
      .is_ok()
    {
      $crate::log_with!($logger, $level, $($arg)*);
    }
  }};
}

/// Passes exactly once per thread.
#[macro_export]
macro_rules! log_once_thread {
  ($logger:expr, $level:expr, $($arg:tt)*) => {{
    ::std::thread_local! {
      static FIRED: ::std::cell::Cell<bool> = const { ::std::cell::Cell::new(false) };
    }
    if !FIRED.with(|fired| fired.replace(true)) {
      $crate::log_with!($logger, $level, $($arg)*);
    }
  }};
}

/// Passes every `$n`-th call at this call-site: the 1st, (n+1)th, ...
#[macro_export]
macro_rules! log_every_n {
  ($n:expr, $logger:expr, $level:expr, $($arg:tt)*) => {{
    static CALLS: ::std::sync::atomic::AtomicU64 = ::std::sync::atomic::AtomicU64::new(0);
    let prev = CALLS.fetch_add(1, ::std::sync::atomic::Ordering::Relaxed);
    if prev % ($n as u64) == 0 {
      $crate::log_with!($logger, $level, $($arg)*);
    }
  }};
}

/// Rate-limits this call-site to `$max` records per `$window_secs` seconds.
#[macro_export]
macro_rules! log_moderate {
  ($max:expr, $window_secs:expr, $logger:expr, $level:expr, $($arg:tt)*) => {{
    static LIMITER: ::std::sync::OnceLock<$crate::filter::RateLimitFilter> =
      ::std::sync::OnceLock::new();
    let limiter = LIMITER.get_or_init(|| {
      $crate::filter::RateLimitFilter::new($max, $window_secs, $crate::filter::TimeUnit::Seconds)
    });
    if limiter.allow($crate::record::mono_clock_nanos()) {
      $crate::log_with!($logger, $level, $($arg)*);
    }
  }};
}
