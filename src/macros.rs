/// Checks a condition and reports a fatal assertion failure if it is false.
///
/// Evaluates to the value of the condition, so the failing path can still
/// be handled when the engine is configured not to halt. An optional
/// message follows the condition using [`format!`] syntax; the format
/// string, not the formatted message, takes part in the report id.
///
/// Reports go to the process-wide engine; before [`init`](crate::init) the
/// condition is still evaluated but nothing is reported.
///
/// [`format!`]: std::format
///
/// # Examples
///
/// ```
/// use forensics::check;
///
/// fn withdraw(balance: u64, amount: u64) -> u64 {
///     if !check!(amount <= balance, "overdraft of {}", amount - balance) {
///         return balance;
///     }
///     balance - amount
/// }
/// assert_eq!(withdraw(10, 3), 7);
/// ```
#[macro_export]
macro_rules! check {
    ($($args:tt)+) => {
        $crate::__report_if_false!(true, $($args)+)
    };
}

/// Like [`check!`], but the report is not fatal.
///
/// ```
/// use forensics::verify;
///
/// let retries = 3;
/// verify!(retries < 5, "too many retries: {}", retries);
/// ```
#[macro_export]
macro_rules! verify {
    ($($args:tt)+) => {
        $crate::__report_if_false!(false, $($args)+)
    };
}

/// Like [`check!`], but only evaluated when debug assertions are enabled.
/// Evaluates to `true` otherwise.
#[macro_export]
macro_rules! debug_check {
    ($($args:tt)+) => {
        if $crate::__private::cfg!(debug_assertions) {
            $crate::check!($($args)+)
        } else {
            true
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __report_if_false {
    ($fatal:expr, $cond:expr $(,)?) => {{
        let ok: bool = $cond;
        if !ok {
            $crate::report_failure(
                $crate::Failure::new($crate::__private::stringify!($cond))
                    .function($crate::function_name!())
                    .fatal($fatal),
            );
        }
        ok
    }};
    ($fatal:expr, $cond:expr, $fmt:literal $($arg:tt)*) => {{
        let ok: bool = $cond;
        if !ok {
            $crate::report_failure(
                $crate::Failure::new($crate::__private::stringify!($cond))
                    .function($crate::function_name!())
                    .message($fmt, $crate::__private::format_args!($fmt $($arg)*))
                    .fatal($fatal),
            );
        }
        ok
    }};
}

/// Pushes a context for the rest of the enclosing block.
///
/// ```
/// # forensics::init(forensics::Config::default()).unwrap();
/// fn checkout() {
///     forensics::context!("checkout");
///     // failures until the end of this function name "checkout" as
///     // the responsible context
/// }
/// checkout();
/// # forensics::shutdown();
/// ```
#[macro_export]
macro_rules! context {
    ($name:expr) => {
        let _context_guard = $crate::context($name);
    };
}

/// Records a breadcrumb with optional `key => value` metadata.
///
/// Values may be anything that is `AsRef<str>`.
///
/// ```
/// use forensics::breadcrumb;
///
/// let env = String::from("production");
/// breadcrumb!("boot");
/// breadcrumb!("boot", "env" => env, "region" => "eu");
/// ```
#[macro_export]
macro_rules! breadcrumb {
    ($name:expr $(, $key:expr => $value:expr)* $(,)?) => {
        $crate::add_breadcrumb(
            $name,
            &[$(($key, $crate::__private::AsRef::<str>::as_ref(&$value))),*],
        )
    };
}

/// Expands to the path of the enclosing function, without closure
/// segments.
///
/// ```
/// fn outer() -> &'static str {
///     forensics::function_name!()
/// }
/// assert!(outer().ends_with("outer"));
/// ```
#[macro_export]
macro_rules! function_name {
    () => {{
        fn __here() {}
        $crate::__private::enclosing_function($crate::__private::type_name_of(__here))
    }};
}
