//! Cookie import for gate clearance.
//!
//! Cookies exported from a browser that already passed the gate can be
//! loaded into a session's jar, and the jar can be inspected for the
//! challenge-clearance markers the gate controller waits on.

mod cookies;

pub use cookies::{
    CookieError, CookieLine, cookie_names, import_into_jar, parse_netscape_cookies,
    read_cookie_file,
};
