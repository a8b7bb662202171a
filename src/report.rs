use std::path::Path;

use jpatch::logging::ResolutionFailure;
use jpatch::ValidateError;
use serde_json::json;
use serde_sarif::sarif::{
    Invocation, Location, LogicalLocation, Message, Result as SarifResult, Run, Sarif, Tool, ToolComponent,
    SCHEMA_URL,
};

pub(crate) const PATCH_VALIDATE: &str = "PATCH_VALIDATE";
pub(crate) const PATCH_RESOLVE: &str = "PATCH_RESOLVE";

pub(crate) fn patch_location(patch: &Path) -> Location {
    let logical = LogicalLocation::builder()
        .name(patch.display().to_string())
        .kind("module")
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}

pub(crate) fn class_location(class_name: &str) -> Location {
    let logical = LogicalLocation::builder()
        .name(class_name)
        .kind("type")
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}

/// Result for a patch that failed to parse or validate.
pub(crate) fn validation_result(patch: &Path, error: &ValidateError) -> SarifResult {
    SarifResult::builder()
        .rule_id(PATCH_VALIDATE)
        .message(result_message(format!("{}: {error}", patch.display())))
        .locations(vec![patch_location(patch)])
        .build()
}

/// Result for a patch whose weak names could not be resolved. Every weak
/// class of the failing groups gets a location.
pub(crate) fn resolution_result(patch: &Path, failure: &ResolutionFailure, report: Option<&Path>) -> SarifResult {
    let mut text = format!(
        "{}: no assignment satisfies the patch (failed after {} tests)",
        patch.display(),
        failure.failed_ticks
    );
    if let Some(report) = report {
        text.push_str(&format!("; walk-through written to {}", report.display()));
    }
    let mut locations = vec![patch_location(patch)];
    locations.extend(
        failure
            .groups
            .iter()
            .flatten()
            .map(|class| class_location(&class.name)),
    );
    SarifResult::builder()
        .rule_id(PATCH_RESOLVE)
        .message(result_message(text))
        .locations(locations)
        .build()
}

pub(crate) fn build_invocation() -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .build()
}

pub(crate) fn build_sarif(results: Vec<SarifResult>, invocation: Invocation) -> Sarif {
    let driver = ToolComponent::builder().name("jpatch").build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = Run::builder()
        .tool(tool)
        .invocations(vec![invocation])
        .results(results)
        .build();

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jpatch::logging::LoggedClass;

    fn invocation() -> Invocation {
        Invocation::builder()
            .execution_successful(true)
            .arguments(Vec::<String>::new())
            .build()
    }

    #[test]
    fn sarif_is_minimal_and_valid_shape() {
        let sarif = build_sarif(Vec::new(), invocation());
        let value = serde_json::to_value(&sarif).expect("serialize SARIF");

        assert_eq!(value["version"], "2.1.0");
        assert_eq!(value["$schema"], SCHEMA_URL);
        assert_eq!(value["runs"][0]["tool"]["driver"]["name"], "jpatch");
        assert!(value["runs"][0]["results"]
            .as_array()
            .expect("results array")
            .is_empty());
        assert_eq!(
            value["runs"][0]["invocations"][0]["executionSuccessful"],
            true
        );
    }

    #[test]
    fn validation_failure_names_the_patch_and_line() {
        let error = ValidateError::new("Unknown instruction push-thing").at_line(3);
        let result = validation_result(Path::new("fix.patch"), &error);
        let value = serde_json::to_value(&result).expect("serialize result");

        assert_eq!(value["ruleId"], PATCH_VALIDATE);
        assert_eq!(
            value["message"]["text"],
            "fix.patch: line 3: Unknown instruction push-thing"
        );
        assert_eq!(
            value["locations"][0]["logicalLocations"][0]["name"],
            "fix.patch"
        );
    }

    #[test]
    fn resolution_failure_lists_weak_classes() {
        let failure = ResolutionFailure {
            groups: vec![vec![
                LoggedClass {
                    name: "A".to_string(),
                    matches: vec!["a".to_string(), "b".to_string()],
                },
                LoggedClass {
                    name: "B".to_string(),
                    matches: Vec::new(),
                },
            ]],
            failed_ticks: 4,
            log: String::new(),
        };
        let result = resolution_result(Path::new("fix.patch"), &failure, Some(Path::new("out/1.log")));
        let value = serde_json::to_value(&result).expect("serialize result");

        assert_eq!(value["ruleId"], PATCH_RESOLVE);
        let locations = value["locations"].as_array().expect("locations");
        assert_eq!(locations.len(), 3);
        assert_eq!(locations[2]["logicalLocations"][0]["kind"], "type");
        let text = value["message"]["text"].as_str().expect("text");
        assert!(text.contains("failed after 4 tests"));
        assert!(text.ends_with("out/1.log"));
    }
}
