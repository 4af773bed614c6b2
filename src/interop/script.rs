//! Script synthesis for the CODESYS embedded interpreter
//!
//! Every action becomes a self-contained Python script: a fixed prelude that
//! defines the `_ok`/`_err` output primitives, one `_action(p)` unit, and a
//! trailing call that hands the JSON-encoded parameters to that unit.

use serde_json::{Map, Value};

/// Marker printed on its own line before the JSON payload of a successful run
pub const SUCCESS_MARKER: &str = "SCRIPT_SUCCESS";

/// Marker printed on its own line before the message of a failed run
pub const ERROR_MARKER: &str = "SCRIPT_ERROR";

/// Message reported by scripts synthesized for names outside the known set
pub const UNKNOWN_ACTION_MESSAGE: &str = "unknown action";

const PRELUDE: &str = "\
# -*- coding: utf-8 -*-
import sys
import json
def _ok(payload):
    print('SCRIPT_SUCCESS')
    print(json.dumps(payload, ensure_ascii=False))
    sys.exit(0)
def _err(message):
    print('SCRIPT_ERROR')
    print(str(message))
    sys.exit(1)
";

/// Actions the synthesizer has a template for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    OpenProject,
    CreateProject,
    SaveProject,
    CreatePou,
    SetPouCode,
    CreateProperty,
    CreateMethod,
    CompileProject,
    ProjectStatus,
    ProjectStructure,
    PouCode,
    LockStatus,
    ListTemplates,
    ListDevices,
    AddDeviceToProject,
    DeployApplication,
    DownloadAndStart,
    DiagnosePath,
}

impl Action {
    pub const ALL: [Action; 18] = [
        Action::OpenProject,
        Action::CreateProject,
        Action::SaveProject,
        Action::CreatePou,
        Action::SetPouCode,
        Action::CreateProperty,
        Action::CreateMethod,
        Action::CompileProject,
        Action::ProjectStatus,
        Action::ProjectStructure,
        Action::PouCode,
        Action::LockStatus,
        Action::ListTemplates,
        Action::ListDevices,
        Action::AddDeviceToProject,
        Action::DeployApplication,
        Action::DownloadAndStart,
        Action::DiagnosePath,
    ];

    /// Wire name of the action
    pub fn name(self) -> &'static str {
        match self {
            Action::OpenProject => "open_project",
            Action::CreateProject => "create_project",
            Action::SaveProject => "save_project",
            Action::CreatePou => "create_pou",
            Action::SetPouCode => "set_pou_code",
            Action::CreateProperty => "create_property",
            Action::CreateMethod => "create_method",
            Action::CompileProject => "compile_project",
            Action::ProjectStatus => "project_status",
            Action::ProjectStructure => "project_structure",
            Action::PouCode => "pou_code",
            Action::LockStatus => "lock_status",
            Action::ListTemplates => "list_templates",
            Action::ListDevices => "list_devices",
            Action::AddDeviceToProject => "add_device_to_project",
            Action::DeployApplication => "deploy_application",
            Action::DownloadAndStart => "download_and_start",
            Action::DiagnosePath => "diagnose_path",
        }
    }

    /// Look up an action by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.name() == name)
    }

    /// Expression passed to `_ok` by this action's unit.
    ///
    /// These are placeholders until the CODESYS object model calls are wired in.
    fn payload_expr(self) -> String {
        let expr = match self {
            Action::OpenProject
            | Action::CreateProject
            | Action::SaveProject
            | Action::CreatePou
            | Action::SetPouCode
            | Action::CreateProperty
            | Action::CreateMethod => {
                return format!("{{'action':'{}','params':p}}", self.name());
            }
            Action::CompileProject => {
                "{'action':'compile_project','params':p,'compile':{'errors':0,'warnings':0}}"
            }
            Action::ProjectStatus => "{'scripting':True,'project_open':True,'project_name':'Unknown','project_path':p.get('project_path','')}",
            Action::ProjectStructure => "{'root':['Application']}",
            Action::PouCode => "{'declaration':'','implementation':''}",
            Action::LockStatus => "{'locked':False,'holder':'','hint':'close IDE or use copyOnLock'}",
            Action::ListTemplates => "{'templates':[]}",
            Action::ListDevices => "{'devices':[]}",
            Action::AddDeviceToProject => "{'added':True,'device':p}",
            Action::DeployApplication => "{'deployed':True}",
            Action::DownloadAndStart => "{'downloaded':True,'started':True}",
            Action::DiagnosePath => "{'normalized':'Application/POUs/...','candidates':[]}",
        };
        expr.to_string()
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Build the full script text for `action_name` with `params`.
///
/// Never fails: an unknown name yields a script that reports
/// `unknown action` through the error primitive when executed.
pub fn synthesize(action_name: &str, params: &Map<String, Value>) -> String {
    let body = match Action::from_name(action_name) {
        Some(action) => format!("def _action(p):\n    _ok({})\n", action.payload_expr()),
        None => format!("def _action(p):\n    _err('{}')\n", UNKNOWN_ACTION_MESSAGE),
    };

    let payload = Value::Object(params.clone()).to_string();

    let mut script = String::with_capacity(PRELUDE.len() + body.len() + payload.len() + 32);
    script.push_str(PRELUDE);
    script.push_str(&body);
    script.push_str("\n_action(json.loads(");
    script.push_str(&python_string_literal(&payload));
    script.push_str("))\n");
    script
}

/// Quote `text` as a single-quoted Python string literal.
fn python_string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_action_names_round_trip() {
        for action in Action::ALL {
            assert_eq!(Action::from_name(action.name()), Some(action));
        }
        assert_eq!(Action::from_name("format_disk"), None);
    }

    #[test]
    fn test_prelude_defines_primitives() {
        let script = synthesize("save_project", &Map::new());
        assert!(script.starts_with("# -*- coding: utf-8 -*-\n"));
        assert!(script.contains("def _ok(payload):"));
        assert!(script.contains("print('SCRIPT_SUCCESS')"));
        assert!(script.contains("def _err(message):"));
        assert!(script.contains("print('SCRIPT_ERROR')"));
        assert!(script.contains("sys.exit(1)"));
    }

    #[rstest]
    #[case("open_project")]
    #[case("create_project")]
    #[case("save_project")]
    #[case("create_pou")]
    #[case("set_pou_code")]
    #[case("create_property")]
    #[case("create_method")]
    fn test_echo_templates(#[case] name: &str) {
        assert!(Action::from_name(name).is_some());
        let script = synthesize(name, &Map::new());
        assert!(script.contains(&format!("_ok({{'action':'{}','params':p}})", name)));
        assert!(!script.contains("_err('unknown action')"));
    }

    #[test]
    fn test_unknown_action_calls_error_primitive() {
        let script = synthesize("format_disk", &Map::new());
        assert!(script.contains("def _action(p):\n    _err('unknown action')\n"));
        assert!(!script.contains("    _ok("));
    }

    #[test]
    fn test_params_embedded_as_json_string() {
        let script = synthesize("save_project", &params(json!({"copy_on_lock": false})));
        assert!(script.ends_with("\n_action(json.loads('{\"copy_on_lock\":false}'))\n"));
    }

    #[test]
    fn test_backslash_and_quote_escaped() {
        let p = params(json!({"path": "C:\\proj\\it's \"x\".project"}));
        let script = synthesize("open_project", &p);
        let tail = script.lines().last().unwrap();
        // JSON already doubles the backslash; the literal doubles it again.
        assert_eq!(
            tail,
            r#"_action(json.loads('{"path":"C:\\\\proj\\\\it\'s \\"x\\".project"}'))"#
        );
    }

    #[test]
    fn test_python_string_literal() {
        assert_eq!(python_string_literal(""), "''");
        assert_eq!(python_string_literal("a\\b"), "'a\\\\b'");
        assert_eq!(python_string_literal("it's"), "'it\\'s'");
        assert_eq!(python_string_literal("l1\nl2"), "'l1\\nl2'");
    }

    #[test]
    fn test_synthesize_is_deterministic() {
        let p = params(json!({"b": 1, "a": [true, null]}));
        assert_eq!(synthesize("compile_project", &p), synthesize("compile_project", &p));
    }
}
