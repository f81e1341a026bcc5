use std::{
    fmt,
    fmt::{Debug, Display},
};

/// A wrapper that keeps its value (promo codes, credentials) out of debug output and logs.
#[derive(Clone, Default)]
pub struct Secret<T>
where T: Clone + Default
{
    value: T,
}

impl<T: Clone + Default> Secret<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn reveal(&self) -> &T {
        &self.value
    }
}

impl<T: Clone + Default> Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

impl<T: Clone + Default> Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn secrets_do_not_leak_in_debug_output() {
        let code = Secret::new("EARLYBIRD".to_string());
        assert_eq!(format!("{code:?}"), "****");
        assert_eq!(format!("{code}"), "****");
        assert_eq!(code.reveal(), "EARLYBIRD");
    }
}
