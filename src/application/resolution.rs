use crate::domain::models::{Entry, LinkTarget, RemoteCatalog};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::mapping_cache::MappingCache;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

pub const SKIP_UPLOAD_LABEL: &str = "SKIP UPLOAD";
pub const SKIP_ACTIVITY_LABEL: &str = "SKIP ACTIVITY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionState {
    Idle,
    AwaitingTask { project_code: String },
    AwaitingActivity { project_code: String },
    Done { all_resolved: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskChoice {
    Task(i64),
    SkipUpload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityChoice {
    Activity(i64),
    SkipActivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Task,
    Activity,
}

/// One selectable row. `id` is `None` for the skip row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionOption {
    pub id: Option<i64>,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionPrompt {
    pub project_code: String,
    pub kind: PromptKind,
    pub options: Vec<ResolutionOption>,
    /// Codes still queued after the current one.
    pub remaining: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionStep {
    Prompt(ResolutionPrompt),
    Complete { all_resolved: bool },
}

/// Walks unresolved project codes one at a time: task choice, then activity choice.
/// Every choice is persisted as soon as it is made.
pub struct ResolutionController<M>
where
    M: MappingCache,
{
    mapping_cache: Arc<M>,
    state: ResolutionState,
    queue: VecDeque<String>,
    catalog: RemoteCatalog,
}

impl<M> ResolutionController<M>
where
    M: MappingCache,
{
    pub fn new(mapping_cache: Arc<M>) -> Self {
        Self {
            mapping_cache,
            state: ResolutionState::Idle,
            queue: VecDeque::new(),
            catalog: RemoteCatalog::default(),
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            ResolutionState::AwaitingTask { .. } | ResolutionState::AwaitingActivity { .. }
        )
    }

    /// Distinct project codes without a resolved link, in first-seen order.
    pub fn unresolved_codes(&self, entries: &[Entry]) -> Result<Vec<String>, InfraError> {
        let mut seen = HashSet::new();
        let mut unresolved = Vec::new();
        for entry in entries {
            let code = entry.project_code.trim();
            if !seen.insert(code.to_string()) {
                continue;
            }
            let resolved = self
                .mapping_cache
                .get(code)?
                .is_some_and(|link| link.is_resolved());
            if !resolved {
                unresolved.push(code.to_string());
            }
        }
        Ok(unresolved)
    }

    pub fn begin(
        &mut self,
        entries: &[Entry],
        catalog: &RemoteCatalog,
    ) -> Result<ResolutionStep, InfraError> {
        if self.is_busy() {
            return Err(InfraError::ResolutionInProgress);
        }

        let codes = self.unresolved_codes(entries)?;
        if codes.is_empty() {
            self.state = ResolutionState::Done { all_resolved: true };
            return Ok(ResolutionStep::Complete { all_resolved: true });
        }
        if catalog.is_empty() {
            self.state = ResolutionState::Idle;
            return Err(InfraError::CatalogUnavailable(
                "no remote tasks to resolve against".to_string(),
            ));
        }

        info!(unresolved = codes.len(), "starting project code resolution");
        self.queue = codes.into();
        self.catalog = catalog.clone();
        Ok(self.advance())
    }

    pub fn choose_task(&mut self, choice: TaskChoice) -> Result<ResolutionStep, InfraError> {
        let ResolutionState::AwaitingTask { project_code } = &self.state else {
            return Err(InfraError::Validation(
                "no task choice is expected right now".to_string(),
            ));
        };
        let project_code = project_code.clone();

        let target = match choice {
            TaskChoice::Task(id) => {
                if self.catalog.task(id).is_none() {
                    return Err(InfraError::Validation(format!("unknown remote task {id}")));
                }
                LinkTarget::Remote(id)
            }
            TaskChoice::SkipUpload => LinkTarget::Declined,
        };
        self.mapping_cache.put(&project_code, target)?;
        debug!(project_code = %project_code, task = target.as_raw(), "task chosen");

        let prompt = self.activity_prompt(&project_code);
        self.state = ResolutionState::AwaitingActivity { project_code };
        Ok(ResolutionStep::Prompt(prompt))
    }

    pub fn choose_activity(
        &mut self,
        choice: ActivityChoice,
    ) -> Result<ResolutionStep, InfraError> {
        let ResolutionState::AwaitingActivity { project_code } = &self.state else {
            return Err(InfraError::Validation(
                "no activity choice is expected right now".to_string(),
            ));
        };
        let project_code = project_code.clone();

        let target = match choice {
            ActivityChoice::Activity(id) => {
                if self.catalog.activity(id).is_none() {
                    return Err(InfraError::Validation(format!(
                        "unknown remote activity {id}"
                    )));
                }
                LinkTarget::Remote(id)
            }
            ActivityChoice::SkipActivity => LinkTarget::Declined,
        };
        self.mapping_cache.put_activity(&project_code, target)?;
        debug!(project_code = %project_code, activity = target.as_raw(), "activity chosen");

        Ok(self.advance())
    }

    /// Abandons the batch. Choices already made stay persisted.
    pub fn cancel(&mut self) -> ResolutionStep {
        if self.is_busy() {
            info!(skipped = self.queue.len() + 1, "resolution cancelled");
        }
        self.queue.clear();
        self.state = ResolutionState::Done {
            all_resolved: false,
        };
        ResolutionStep::Complete {
            all_resolved: false,
        }
    }

    pub fn prompt(&self) -> Option<ResolutionPrompt> {
        match &self.state {
            ResolutionState::AwaitingTask { project_code } => Some(self.task_prompt(project_code)),
            ResolutionState::AwaitingActivity { project_code } => {
                Some(self.activity_prompt(project_code))
            }
            ResolutionState::Idle | ResolutionState::Done { .. } => None,
        }
    }

    fn advance(&mut self) -> ResolutionStep {
        match self.queue.pop_front() {
            Some(project_code) => {
                let prompt = self.task_prompt(&project_code);
                self.state = ResolutionState::AwaitingTask { project_code };
                ResolutionStep::Prompt(prompt)
            }
            None => {
                self.state = ResolutionState::Done { all_resolved: true };
                ResolutionStep::Complete { all_resolved: true }
            }
        }
    }

    fn task_prompt(&self, project_code: &str) -> ResolutionPrompt {
        let options = std::iter::once(ResolutionOption {
            id: None,
            label: SKIP_UPLOAD_LABEL.to_string(),
        })
        .chain(self.catalog.tasks.iter().map(|task| ResolutionOption {
            id: Some(task.id),
            label: task.label(),
        }))
        .collect();
        ResolutionPrompt {
            project_code: project_code.to_string(),
            kind: PromptKind::Task,
            options,
            remaining: self.queue.len(),
        }
    }

    fn activity_prompt(&self, project_code: &str) -> ResolutionPrompt {
        let options = std::iter::once(ResolutionOption {
            id: None,
            label: SKIP_ACTIVITY_LABEL.to_string(),
        })
        .chain(self.catalog.activities.iter().map(|activity| ResolutionOption {
            id: Some(activity.id),
            label: activity.label(),
        }))
        .collect();
        ResolutionPrompt {
            project_code: project_code.to_string(),
            kind: PromptKind::Activity,
            options,
            remaining: self.queue.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mapping_cache::InMemoryMappingCache;
    use crate::test_support::{catalog, entry};
    use proptest::prelude::*;

    fn controller() -> (Arc<InMemoryMappingCache>, ResolutionController<InMemoryMappingCache>) {
        let cache = Arc::new(InMemoryMappingCache::default());
        (cache.clone(), ResolutionController::new(cache))
    }

    fn expect_prompt(step: ResolutionStep) -> ResolutionPrompt {
        match step {
            ResolutionStep::Prompt(prompt) => prompt,
            other => panic!("expected prompt, got {other:?}"),
        }
    }

    #[test]
    fn unlinked_code_walks_task_then_activity() {
        let (cache, mut controller) = controller();
        let remote = catalog(&[42, 43], &[7]);

        let prompt = expect_prompt(
            controller
                .begin(&[entry(1, "2026-02-16", "ABC")], &remote)
                .expect("begin"),
        );
        assert_eq!(prompt.kind, PromptKind::Task);
        assert_eq!(prompt.project_code, "ABC");
        assert_eq!(prompt.options[0].label, SKIP_UPLOAD_LABEL);
        assert_eq!(prompt.options.len(), 3);

        let prompt = expect_prompt(controller.choose_task(TaskChoice::Task(42)).expect("task"));
        assert_eq!(prompt.kind, PromptKind::Activity);
        assert_eq!(prompt.options[0].label, SKIP_ACTIVITY_LABEL);
        let link = cache.get("ABC").expect("get").expect("persisted before activity");
        assert_eq!(link.task, Some(LinkTarget::Remote(42)));
        assert_eq!(link.activity, None);

        let step = controller
            .choose_activity(ActivityChoice::SkipActivity)
            .expect("activity");
        assert_eq!(step, ResolutionStep::Complete { all_resolved: true });
        let link = cache.get("ABC").expect("get").expect("link");
        assert_eq!(link.activity, Some(LinkTarget::Declined));
        assert_eq!(link.activity_for_submission(), 0);
    }

    #[test]
    fn resolved_and_declined_codes_are_not_prompted() {
        let (cache, mut controller) = controller();
        cache.put("ABC", LinkTarget::Remote(42)).expect("link");
        cache.put("SKIP", LinkTarget::Declined).expect("decline");

        let step = controller
            .begin(
                &[entry(1, "2026-02-16", "ABC"), entry(2, "2026-02-16", "SKIP")],
                &catalog(&[42], &[]),
            )
            .expect("begin");
        assert_eq!(step, ResolutionStep::Complete { all_resolved: true });
        assert!(!controller.is_busy());
    }

    #[test]
    fn empty_catalog_with_unresolved_codes_is_a_catalog_failure() {
        let (_cache, mut controller) = controller();
        let result = controller.begin(&[entry(1, "2026-02-16", "ABC")], &catalog(&[], &[7]));
        assert!(matches!(result, Err(InfraError::CatalogUnavailable(_))));
        assert_eq!(controller.state, ResolutionState::Idle);
    }

    #[test]
    fn second_batch_is_rejected_while_busy() {
        let (_cache, mut controller) = controller();
        let remote = catalog(&[42], &[]);
        controller
            .begin(&[entry(1, "2026-02-16", "ABC")], &remote)
            .expect("begin");

        let result = controller.begin(&[entry(2, "2026-02-16", "XYZ")], &remote);
        assert!(matches!(result, Err(InfraError::ResolutionInProgress)));
        assert_eq!(
            controller.state,
            ResolutionState::AwaitingTask {
                project_code: "ABC".to_string()
            }
        );
    }

    #[test]
    fn cancel_keeps_choices_already_made() {
        let (cache, mut controller) = controller();
        let remote = catalog(&[42], &[7]);
        controller
            .begin(
                &[entry(1, "2026-02-16", "ABC"), entry(2, "2026-02-16", "XYZ")],
                &remote,
            )
            .expect("begin");
        controller.choose_task(TaskChoice::Task(42)).expect("task");
        let prompt = expect_prompt(
            controller
                .choose_activity(ActivityChoice::Activity(7))
                .expect("activity"),
        );
        assert_eq!(prompt.project_code, "XYZ");
        assert_eq!(prompt.remaining, 0);

        assert_eq!(
            controller.cancel(),
            ResolutionStep::Complete {
                all_resolved: false
            }
        );
        assert!(cache.get("ABC").expect("get").is_some_and(|link| link.is_resolved()));
        assert!(cache.get("XYZ").expect("get").is_none());

        let retry = controller
            .begin(&[entry(2, "2026-02-16", "XYZ")], &remote)
            .expect("new batch allowed after cancel");
        assert_eq!(expect_prompt(retry).project_code, "XYZ");
    }

    #[test]
    fn unknown_ids_and_out_of_order_choices_are_rejected() {
        let (cache, mut controller) = controller();
        let remote = catalog(&[42], &[7]);
        assert!(controller.choose_task(TaskChoice::Task(42)).is_err());

        controller
            .begin(&[entry(1, "2026-02-16", "ABC")], &remote)
            .expect("begin");
        assert!(controller.choose_activity(ActivityChoice::Activity(7)).is_err());
        assert!(matches!(
            controller.choose_task(TaskChoice::Task(99)),
            Err(InfraError::Validation(_))
        ));
        assert!(cache.get("ABC").expect("get").is_none());
        assert!(controller.prompt().is_some_and(|prompt| prompt.kind == PromptKind::Task));
    }

    #[test]
    fn skip_upload_records_sentinel() {
        let (cache, mut controller) = controller();
        controller
            .begin(&[entry(1, "2026-02-16", "ABC")], &catalog(&[42], &[]))
            .expect("begin");
        controller.choose_task(TaskChoice::SkipUpload).expect("skip");
        controller
            .choose_activity(ActivityChoice::SkipActivity)
            .expect("skip activity");

        let link = cache.get("ABC").expect("get").expect("link");
        assert!(link.is_declined());
        let codes = controller
            .unresolved_codes(&[entry(2, "2026-02-17", "ABC")])
            .expect("codes");
        assert!(codes.is_empty());
    }

    proptest! {
        #[test]
        fn unresolved_codes_are_distinct_in_first_seen_order(
            codes in proptest::collection::vec("[A-D]", 0..20)
        ) {
            let (_cache, controller) = controller();
            let entries: Vec<Entry> = codes
                .iter()
                .enumerate()
                .map(|(index, code)| entry(index as i64, "2026-02-16", code))
                .collect();

            let mut expected: Vec<String> = Vec::new();
            for code in &codes {
                if !expected.contains(code) {
                    expected.push(code.clone());
                }
            }
            prop_assert_eq!(controller.unresolved_codes(&entries).expect("codes"), expected);
        }
    }
}
