//! Stage one: reject scripts that do not parse, misuse a primitive's
//! signature or mention a forbidden construct.

use tracing::debug;

use crate::core::forbidden;
use crate::core::signature::SignatureTable;
use crate::core::types::ValidationIssue;
use crate::script::{CallTarget, Engine};

/// All issues for `source`, errors and warnings mixed, in check order.
///
/// A parse failure is reported alone; nothing else is checked after it.
pub fn check(engine: &dyn Engine, table: &SignatureTable, source: &str) -> Vec<ValidationIssue> {
    let program = match engine.compile(source, &table.names()) {
        Ok(program) => program,
        Err(err) => {
            return vec![ValidationIssue::error(format!("Syntax error: {}", err.message)).at_line(err.line)];
        }
    };

    let mut issues = Vec::new();
    for site in program.call_sites() {
        match site.target {
            CallTarget::External => {
                let Some(signature) = table.get(&site.function) else {
                    continue;
                };
                for mismatch in signature.check(&site) {
                    issues.push(
                        ValidationIssue::error(format!("Type error: {mismatch}")).at_line(Some(site.line)),
                    );
                }
            }
            CallTarget::Unknown if !forbidden::is_forbidden(&site.function) => {
                issues.push(
                    ValidationIssue::warning(format!("unknown function: {}()", site.function))
                        .at_line(Some(site.line)),
                );
            }
            _ => {}
        }
    }

    for found in forbidden::scan(source) {
        issues.push(
            ValidationIssue::error(format!("Forbidden construct: {}", found.construct))
                .at_line(Some(found.line)),
        );
    }

    debug!(issues = issues.len(), "static check finished");
    issues
}

pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues.iter().any(ValidationIssue::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Severity;
    use crate::script::Interpreter;

    fn run(source: &str) -> Vec<ValidationIssue> {
        check(&Interpreter::new(), &SignatureTable::ledger_default(), source)
    }

    #[test]
    fn syntax_error_is_the_only_issue() {
        let issues = run("x = (1,\neval('2')\n");
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.starts_with("Syntax error: "), "{issues:?}");
        assert!(issues[0].is_error());
    }

    #[test]
    fn type_errors_name_the_call_site() {
        let issues = run("x = 1\njournal_void(5, reason='dup')\n");
        assert_eq!(
            issues,
            vec![
                ValidationIssue::error(
                    "Type error: journal_void() argument 'entry_id' expects str, got int"
                )
                .at_line(Some(2))
            ]
        );
    }

    #[test]
    fn forbidden_constructs_are_errors_even_when_unreachable() {
        let issues = run("if False:\n    eval('1')\n");
        let errors: Vec<_> = issues.iter().filter(|i| i.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Forbidden construct: eval(");
        assert_eq!(errors[0].location.as_deref(), Some("line 2"));
    }

    #[test]
    fn unknown_functions_only_warn() {
        let issues = run("helper(1)\n");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert!(!has_errors(&issues));
    }

    #[test]
    fn clean_script_has_no_issues() {
        let source = "\
files = importer_scan()
for f in files:
    txns = importer_parse(f['name'])
    ctx_log('parsed ' + str(len(txns)))
    importer_mark_processed(f['name'])
";
        assert!(run(source).is_empty());
    }
}
