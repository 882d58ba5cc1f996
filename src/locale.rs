//! Locale-aware string comparison for key fields
//!
//! A [`Collator`] compares strings under one LC_COLLATE locale. `C` and
//! `POSIX` use plain byte order; any other locale is opened once with
//! `newlocale` and used through `strcoll` under a temporary `uselocale`, so
//! collators for different locales can live side by side.

use crate::error::{SortError, SortResult};
use std::cmp::Ordering;
use std::ffi::CString;
use std::fmt;
use std::sync::Arc;

/// How much of the string difference the collator looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    CaseSensitive,
    CaseInsensitive,
}

/// Compares strings under one locale
#[derive(Clone)]
pub struct Collator {
    locale_name: String,
    strength: Strength,
    handle: Option<Arc<LocaleHandle>>,
}

impl fmt::Debug for Collator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collator")
            .field("locale", &self.locale_name)
            .field("strength", &self.strength)
            .finish()
    }
}

impl Collator {
    /// Open a collator for `locale` (e.g. `en_US.UTF-8`)
    pub fn new(locale: &str, strength: Strength) -> SortResult<Self> {
        let handle = if is_byte_order_locale(locale) {
            None
        } else {
            Some(Arc::new(LocaleHandle::open(locale)?))
        };
        Ok(Self {
            locale_name: locale.to_string(),
            strength,
            handle,
        })
    }

    pub fn locale_name(&self) -> &str {
        &self.locale_name
    }

    pub fn strength(&self) -> Strength {
        self.strength
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        match self.strength {
            Strength::CaseSensitive => self.collate(a, b),
            Strength::CaseInsensitive => self.collate(&a.to_lowercase(), &b.to_lowercase()),
        }
    }

    fn collate(&self, a: &str, b: &str) -> Ordering {
        match &self.handle {
            Some(handle) => handle.strcoll(a, b),
            None => a.as_bytes().cmp(b.as_bytes()),
        }
    }
}

fn is_byte_order_locale(locale: &str) -> bool {
    locale.is_empty() || locale == "C" || locale == "POSIX"
}

/// Owned `locale_t` released on drop
struct LocaleHandle {
    #[cfg(unix)]
    raw: libc::locale_t,
}

// SAFETY: a locale object is never modified after newlocale returns it, and
// uselocale only installs it for the calling thread.
unsafe impl Send for LocaleHandle {}
unsafe impl Sync for LocaleHandle {}

impl LocaleHandle {
    #[cfg(unix)]
    fn open(locale: &str) -> SortResult<Self> {
        let name = CString::new(locale).map_err(|_| SortError::UnknownLocale {
            locale: locale.to_string(),
        })?;
        // SAFETY: name is a valid NUL-terminated string; a null base asks for a
        // fresh locale object.
        let raw = unsafe {
            libc::newlocale(libc::LC_COLLATE_MASK, name.as_ptr(), std::ptr::null_mut())
        };
        if raw.is_null() {
            return Err(SortError::UnknownLocale {
                locale: locale.to_string(),
            });
        }
        Ok(Self { raw })
    }

    #[cfg(not(unix))]
    fn open(locale: &str) -> SortResult<Self> {
        Err(SortError::UnknownLocale {
            locale: locale.to_string(),
        })
    }

    #[cfg(unix)]
    fn strcoll(&self, a: &str, b: &str) -> Ordering {
        let (a_cstr, b_cstr) = match (CString::new(a), CString::new(b)) {
            (Ok(a_cstr), Ok(b_cstr)) => (a_cstr, b_cstr),
            // interior NUL, fall back to byte order
            _ => return a.as_bytes().cmp(b.as_bytes()),
        };
        // SAFETY: raw is a live locale object owned by self; the previous
        // thread locale is restored before returning.
        let result = unsafe {
            let previous = libc::uselocale(self.raw);
            let result = libc::strcoll(a_cstr.as_ptr(), b_cstr.as_ptr());
            libc::uselocale(previous);
            result
        };
        result.cmp(&0)
    }

    #[cfg(not(unix))]
    fn strcoll(&self, a: &str, b: &str) -> Ordering {
        a.as_bytes().cmp(b.as_bytes())
    }
}

#[cfg(unix)]
impl Drop for LocaleHandle {
    fn drop(&mut self) {
        // SAFETY: raw came from newlocale and is freed exactly once.
        unsafe {
            libc::freelocale(self.raw);
        }
    }
}
