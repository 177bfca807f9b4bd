//! Encoder configuration.
//!
//! Which unwind format a JIT emits is a property of the platform it runs on,
//! so the defaults are chosen at build time. Tests and tools override them to
//! exercise both encoders on any host.

/// Target unwind format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindFormat {
    /// Windows x64 `RUNTIME_FUNCTION` + `UNWIND_INFO` with back-filled codes.
    Table,
    /// Minimal `.eh_frame`: one CIE, one FDE and a terminator.
    EhFrame,
}

impl UnwindFormat {
    /// Format consumed by the unwinder of the build target.
    pub const fn host() -> Self {
        if cfg!(windows) {
            UnwindFormat::Table
        } else {
            UnwindFormat::EhFrame
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            UnwindFormat::Table => "pdata",
            UnwindFormat::EhFrame => "eh_frame",
        }
    }
}

/// How instructions classified as not unwind-relevant affect offset tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IgnoredInstrPolicy {
    /// Ignored instructions still occupy bytes: their size moves the
    /// instruction offset so later directives land on the true PC.
    #[default]
    AdvanceOffset,
    /// Ignored instructions are invisible; the offset only counts
    /// unwind-relevant instructions.
    Invisible,
}

/// Configuration for a [`PrologEncoder`](crate::prolog::PrologEncoder).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    pub format: UnwindFormat,
    pub ignored_instructions: IgnoredInstrPolicy,
}

impl EncoderConfig {
    pub fn with_format(format: UnwindFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    pub fn ignored_instructions(mut self, policy: IgnoredInstrPolicy) -> Self {
        self.ignored_instructions = policy;
        self
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            format: UnwindFormat::host(),
            ignored_instructions: IgnoredInstrPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_host() {
        let config = EncoderConfig::default();
        assert_eq!(config.format, UnwindFormat::host());
        assert_eq!(config.ignored_instructions, IgnoredInstrPolicy::AdvanceOffset);
    }

    #[test]
    fn test_builder_overrides() {
        let config = EncoderConfig::with_format(UnwindFormat::Table)
            .ignored_instructions(IgnoredInstrPolicy::Invisible);
        assert_eq!(config.format, UnwindFormat::Table);
        assert_eq!(config.ignored_instructions, IgnoredInstrPolicy::Invisible);
    }
}
