//! Statement capture.
//!
//! Every statement handed to the database through a [`TappedConn`](crate::TappedConn)
//! is recorded here. When the statement starts with a `/* ... */` comment
//! block (the query template the statement was generated from), the comment
//! and the remaining statement are stored as a pair.

use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

use regex::Regex;

use crate::{Error, Result};

/// A comment block, whitespace, then the rest of the statement.
static COMMENTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^(/\*.*?\*/)(\s+.*)$").expect("valid regex"));

/// One statement observed on its way to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedStatement {
    /// The leading comment block, if the statement carried one.
    pub template: Option<String>,

    /// The statement text following the comment.
    pub issued: String,
}

impl CapturedStatement {
    /// Split raw statement text into its template comment and issued statement.
    pub fn parse(raw: &str) -> Self {
        match COMMENTED.captures(raw) {
            Some(caps) => Self {
                template: Some(caps[1].trim().to_owned()),
                issued: caps[2].trim().to_owned(),
            },
            None => Self {
                template: None,
                issued: raw.trim().to_owned(),
            },
        }
    }
}

/// Ordered record of every statement intercepted during a session.
///
/// Sessions are passed by reference to the connections that record into
/// them. Recording and clearing take the same lock.
#[derive(Debug, Default)]
pub struct CaptureSession {
    statements: Mutex<Vec<CapturedStatement>>,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CapturedStatement>> {
        self.statements.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `raw` and hand it back untouched.
    pub fn intercept<'s>(&self, raw: &'s str) -> &'s str {
        let statement = CapturedStatement::parse(raw);
        tracing::debug!(
            template = statement.template.as_deref().unwrap_or(""),
            issued = %statement.issued,
            "captured statement"
        );
        self.lock().push(statement);
        raw
    }

    /// Template comments, in capture order. Statements without one are skipped.
    pub fn templates(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|s| s.template.clone())
            .collect()
    }

    /// Issued statements, in capture order.
    pub fn issued(&self) -> Vec<String> {
        self.lock().iter().map(|s| s.issued.clone()).collect()
    }

    pub fn statements(&self) -> Vec<CapturedStatement> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Open an observation window: the session is cleared now and again
    /// when the window is dropped.
    pub fn window(&self) -> CaptureWindow<'_> {
        self.clear();
        CaptureWindow { session: self }
    }
}

/// Scoped view over a [`CaptureSession`], see [`CaptureSession::window`].
pub struct CaptureWindow<'a> {
    session: &'a CaptureSession,
}

impl CaptureWindow<'_> {
    pub fn session(&self) -> &CaptureSession {
        self.session
    }

    /// The single statement observed in this window.
    ///
    /// Fails with [`Error::CaptureMismatch`] when nothing or more than one
    /// statement went through.
    pub fn take_single(&self) -> Result<CapturedStatement> {
        let mut statements = self.session.lock();
        if statements.len() != 1 {
            return Err(Error::CaptureMismatch {
                expected: 1,
                actual: statements.len(),
            });
        }
        Ok(statements.remove(0))
    }
}

impl Drop for CaptureWindow<'_> {
    fn drop(&mut self) {
        self.session.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn splits_template_comment_from_statement() {
        let session = CaptureSession::new();
        let input = "/* SELECT p FROM Person p WHERE p.name = :name */ select p1_0.id,p1_0.name from person p1_0 where p1_0.name=?";

        assert_eq!(session.intercept(input), input);

        assert_eq!(
            session.templates(),
            vec!["/* SELECT p FROM Person p WHERE p.name = :name */"]
        );
        assert_eq!(
            session.issued(),
            vec!["select p1_0.id,p1_0.name from person p1_0 where p1_0.name=?"]
        );
    }

    #[test]
    fn statement_without_comment_records_no_template() {
        let session = CaptureSession::new();
        let input = "select p1_0.id,p1_0.name from person p1_0 where p1_0.name=?";

        assert_eq!(session.intercept(input), input);
        assert!(session.templates().is_empty());
        assert_eq!(session.issued(), vec![input]);
    }

    #[test]
    fn multiline_comment_is_one_template() {
        let session = CaptureSession::new();
        let input = "/* SELECT p \n FROM Person p \n WHERE p.name = :name */ select p1_0.id,p1_0.name from person p1_0 where p1_0.name=?";
        session.intercept(input);

        let templates = session.templates();
        assert_eq!(templates.len(), 1);
        assert!(templates[0].contains("SELECT p"));
        assert!(templates[0].contains("WHERE p.name = :name"));
        assert!(session.issued()[0].starts_with("select"));
    }

    #[test]
    fn comment_with_empty_remainder_stores_empty_statement() {
        let session = CaptureSession::new();
        session.intercept("/* SELECT 1 */   ");

        assert_eq!(session.templates(), vec!["/* SELECT 1 */"]);
        assert_eq!(session.issued(), vec![""]);
    }

    #[test]
    fn comment_without_trailing_whitespace_is_not_split() {
        let session = CaptureSession::new();
        session.intercept("/* x */select 1");

        assert!(session.templates().is_empty());
        assert_eq!(session.issued(), vec!["/* x */select 1"]);
    }

    #[test]
    fn first_comment_closer_ends_the_template() {
        let statement = CapturedStatement::parse("/* a */ /* b */ select 1");
        assert_eq!(statement.template.as_deref(), Some("/* a */"));
        assert_eq!(statement.issued, "/* b */ select 1");
    }

    #[test]
    fn clear_empties_both_stores() {
        let session = CaptureSession::new();
        session.intercept("/* q */ select 1");
        session.intercept("select 2");
        assert_eq!(session.len(), 2);

        session.clear();
        assert!(session.is_empty());
        assert!(session.templates().is_empty());
    }

    #[test]
    fn window_clears_on_open_and_drop() {
        let session = CaptureSession::new();
        session.intercept("select stale");

        {
            let window = session.window();
            assert!(window.session().is_empty());
            session.intercept("/* q */ select 1");
            let statement = window.take_single().unwrap();
            assert_eq!(statement.issued, "select 1");

            session.intercept("select 2");
        }

        assert!(session.is_empty());
    }

    #[test]
    fn window_rejects_multiple_statements() {
        let session = CaptureSession::new();
        let window = session.window();
        session.intercept("select 1");
        session.intercept("select 2");

        let err = window.take_single().unwrap_err();
        assert!(matches!(
            err,
            Error::CaptureMismatch {
                expected: 1,
                actual: 2
            }
        ));
    }

    #[test]
    fn window_rejects_no_statement() {
        let session = CaptureSession::new();
        let window = session.window();
        assert!(matches!(
            window.take_single(),
            Err(Error::CaptureMismatch { actual: 0, .. })
        ));
    }

    proptest! {
        #[test]
        fn commented_statement_round_trips(
            body in "[A-Za-z][A-Za-z0-9 =:.]{0,40}",
            stmt in "[a-z][a-z0-9 =?,.]{0,40}",
        ) {
            let template = format!("/* {body} */");
            let stmt = stmt.trim().to_owned();
            prop_assume!(!stmt.is_empty());
            let input = format!("{template} {stmt}");

            let session = CaptureSession::new();
            prop_assert_eq!(session.intercept(&input), input.as_str());
            prop_assert_eq!(session.templates(), vec![template]);
            prop_assert_eq!(session.issued(), vec![stmt]);
        }

        #[test]
        fn plain_statement_is_trimmed(stmt in "[a-z][a-z0-9 =?,.]{0,40}") {
            let input = format!("  {stmt}\n");
            let session = CaptureSession::new();
            session.intercept(&input);
            prop_assert!(session.templates().is_empty());
            prop_assert_eq!(session.issued(), vec![input.trim().to_owned()]);
        }
    }
}
