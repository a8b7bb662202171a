use std::time::Instant;

use log::{debug, info};

use crate::apply::apply_class;
use crate::check::{check_attributes, check_fields, check_method_instructions, check_methods};
use crate::classset::ClassSet;
use crate::error::Result;
use crate::logging::StateLogger;
use crate::matching::MatchGenerator;
use crate::patch::{Mode, PatchClass, PatchClasses};
use crate::scope::PatchScope;

type Check = fn(&PatchClass, &mut StateLogger, &mut PatchScope<'_>, &ClassSet) -> bool;

/// Resolves patches against a class set and applies them in place.
#[derive(Debug)]
pub struct Patcher {
    class_set: ClassSet,
    trace: bool,
}

impl Patcher {
    pub fn new(mut class_set: ClassSet) -> Self {
        class_set.simplify();
        Self {
            class_set,
            trace: false,
        }
    }

    /// Keep the search walk-through so failures can explain themselves.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn class_set(&self) -> &ClassSet {
        &self.class_set
    }

    pub fn into_class_set(self) -> ClassSet {
        self.class_set
    }

    /// Parse `source`, resolve it from scratch and apply it.
    pub fn apply(&mut self, source: &str) -> Result<PatchScope<'static>> {
        let patch = PatchClasses::parse(source)?;
        self.apply_with_scope(&patch, &PatchScope::new())
    }

    /// Resolve `patch` with `scope`'s bindings fixed, then apply it.
    pub fn apply_with_scope(&mut self, patch: &PatchClasses, scope: &PatchScope<'_>) -> Result<PatchScope<'static>> {
        let started_at = Instant::now();
        let mut resolved = MatchGenerator::new(&self.class_set, patch, self.trace).apply(scope)?;
        info!(
            "resolved {} patch classes in {} ms",
            patch.classes.len(),
            started_at.elapsed().as_millis()
        );
        self.apply_resolved(patch, &mut resolved)?;
        Ok(resolved)
    }

    /// Apply `patch` with the bindings of a previous resolution, without
    /// searching. Every class is checked against `scope` first.
    pub fn reapply(&mut self, patch: &PatchClasses, scope: &PatchScope<'_>) -> Result<PatchScope<'static>> {
        let mut resolved = scope.duplicate();
        let mut logger = StateLogger::new(true);
        let checks: [(&str, Check); 4] = [
            ("attribute", check_attributes),
            ("field", check_fields),
            ("method", check_methods),
            ("instruction", check_method_instructions),
        ];
        let existing: Vec<&PatchClass> = patch
            .classes
            .iter()
            .filter(|class| class.mode != Mode::Add)
            .collect();
        for (name, check) in checks {
            for class in &existing {
                if !check(class, &mut logger, &mut resolved, &self.class_set) {
                    logger.println(format!("{name} check failed for {}", class.ident));
                    return Err(logger.into_failure().into());
                }
            }
        }
        debug!("reapplying {} patch classes", patch.classes.len());
        self.apply_resolved(patch, &mut resolved)?;
        Ok(resolved)
    }

    fn apply_resolved(&mut self, patch: &PatchClasses, scope: &mut PatchScope<'_>) -> Result<()> {
        for class in &patch.classes {
            apply_class(class, scope, &mut self.class_set)?;
        }
        Ok(())
    }
}
