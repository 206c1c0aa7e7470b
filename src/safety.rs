//! Safety filter for generated expressions
//!
//! Static denylist check run before any parsing or evaluation. Matching is
//! case-insensitive substring matching, so a field literally named "system"
//! is blocked too.

use crate::error::PipelineError;
use crate::Result;
use tracing::warn;

/// Substrings that disqualify an expression outright
pub const DENYLIST: &[&str] = &[
    "import", "exec", "eval", "os.", "system", "__", "open", "write",
];

/// First denylisted token found in `expression`, if any
pub fn blocked_token(expression: &str) -> Option<&'static str> {
    let lowered = expression.to_lowercase();
    DENYLIST.iter().copied().find(|token| lowered.contains(token))
}

pub fn check(expression: &str) -> Result<()> {
    match blocked_token(expression) {
        Some(token) => {
            warn!(token, expression = %expression, "Unsafe expression rejected");
            Err(PipelineError::UnsafeExpression(format!("contains '{}'", token)))
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_each_denylisted_token() {
        let cases = [
            "__import__('os')",
            "exec('x')",
            "EVAL('1')",
            "os.listdir('.')",
            "df.__class__",
            "open('/etc/passwd')",
            "df.to_csv('x').write()",
            "System('ls')",
        ];
        for case in cases {
            assert!(check(case).is_err(), "expected rejection: {}", case);
        }
    }

    #[test]
    fn test_rejection_names_the_token() {
        let err = check("__import__('os').system('ls')").unwrap_err();
        assert!(matches!(err, PipelineError::UnsafeExpression(_)));
        assert!(err.to_string().contains("import"));
    }

    #[test]
    fn test_accepts_ordinary_expressions() {
        let cases = [
            "df['Salary'].mean()",
            "df.groupby('Department')['Performance'].max()",
            "df[df['Experience'] > 5].shape[0]",
            "df['Profile'].nunique()",
        ];
        for case in cases {
            assert!(check(case).is_ok(), "expected acceptance: {}", case);
        }
    }

    #[test]
    fn test_blocked_token_reports_match() {
        assert_eq!(blocked_token("df.Reopen"), Some("open"));
        assert_eq!(blocked_token("df.head()"), None);
    }
}
