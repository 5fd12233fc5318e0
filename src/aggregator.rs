//! Result Aggregator (component C8): merges terminal step outputs into one
//! typed artifact.
//!
//! Grounded on `orchestration.rs`'s overlap/Jaccard-similarity conflict
//! resolution, reused here to detect when two terminal steps produced
//! materially the same output (the later-completed step wins; the dropped
//! output is surfaced as a `task_log` warning event rather than silently
//! discarded).

use crate::event::{Event, EventBus, EventType};
use crate::flow::ExecutionFlow;
use crate::role::MergeFamily;
use crate::step::Step;
use crate::task::{OutputType, Task};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Similarity above which two terminal outputs are treated as conflicting
/// duplicates rather than independent contributions (spec.md §4.6).
const CONFLICT_SIMILARITY_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Report { text: String },
    Code { files: Vec<CodeFile> },
    Website { files: Vec<CodeFile> },
    Image { uris: Vec<String> },
    Video { uris: Vec<String> },
    Dataset { text: String },
    Document { text: String },
    Composite { parts: Vec<Artifact> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeFile {
    pub path: String,
    pub content: String,
}

pub struct Aggregator {
    event_bus: EventBus,
}

impl Aggregator {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }

    /// Merges the terminal (no-successor) completed steps of `flow` into one
    /// [`Artifact`]. Idempotent: calling twice against the same terminal
    /// flow produces byte-identical output, since it only reads completed
    /// state and never mutates the flow.
    pub fn aggregate(&self, flow: &ExecutionFlow, task: &Task) -> Artifact {
        let mut terminal: Vec<&Step> = flow
            .terminal_steps()
            .into_iter()
            .filter(|s| s.status == crate::step::StepStatus::Completed)
            .collect();
        terminal.sort_by_key(|s| s.ordinal);
        self.finish(flow.task_id(), task, terminal)
    }

    /// Best-effort merge of every completed step regardless of DAG
    /// position, for a task that did not reach normal completion (a
    /// cancellation, a timeout, an exhausted-retry failure). `None` if
    /// nothing completed before the task stopped (spec.md §7: "always a
    /// best-effort partial artifact when any step completed").
    pub fn aggregate_partial(&self, flow: &ExecutionFlow, task: &Task) -> Option<Artifact> {
        let mut completed: Vec<&Step> = flow
            .all_steps()
            .into_iter()
            .filter(|s| s.status == crate::step::StepStatus::Completed)
            .collect();
        if completed.is_empty() {
            return None;
        }
        completed.sort_by_key(|s| s.ordinal);
        Some(self.finish(flow.task_id(), task, completed))
    }

    fn finish(&self, task_id: uuid::Uuid, task: &Task, steps: Vec<&Step>) -> Artifact {
        let deduped = self.drop_conflicting_duplicates(task_id, steps);
        let output_type = match task.output_type {
            OutputType::Auto => infer_output_type(&deduped),
            other => other,
        };
        self.merge(output_type, &deduped)
    }

    /// Later-completed step wins a pairwise conflict; the earlier one's
    /// output is dropped and logged rather than silently discarded.
    fn drop_conflicting_duplicates<'a>(&self, task_id: uuid::Uuid, steps: Vec<&'a Step>) -> Vec<&'a Step> {
        let mut kept: Vec<&Step> = Vec::with_capacity(steps.len());
        for step in steps {
            let conflict_index = kept.iter().position(|k| jaccard_similarity(text_of(k), text_of(step)) >= CONFLICT_SIMILARITY_THRESHOLD);
            match conflict_index {
                None => kept.push(step),
                Some(idx) => {
                    let earlier = kept[idx];
                    let winner = later_of(earlier, step);
                    let dropped = if std::ptr::eq(winner, earlier) { step } else { earlier };
                    self.event_bus.publish(Event::new(
                        EventType::TaskLog,
                        task_id,
                        serde_json::json!({
                            "message": format!(
                                "step {} dropped as a near-duplicate of step {}",
                                dropped.id, winner.id
                            ),
                        }),
                    ));
                    kept[idx] = winner;
                }
            }
        }
        kept
    }

    fn merge(&self, output_type: OutputType, steps: &[&Step]) -> Artifact {
        match output_type {
            OutputType::Code => Artifact::Code {
                files: steps.iter().map(|s| code_file_of(s)).collect(),
            },
            OutputType::Website => Artifact::Website {
                files: steps.iter().map(|s| code_file_of(s)).collect(),
            },
            OutputType::Image => Artifact::Image {
                uris: steps.iter().map(|s| text_of(s).to_string()).collect(),
            },
            OutputType::Video => Artifact::Video {
                uris: steps.iter().map(|s| text_of(s).to_string()).collect(),
            },
            OutputType::Dataset => Artifact::Dataset {
                text: concatenate_with_headings(steps),
            },
            OutputType::Document => Artifact::Document {
                text: concatenate_with_headings(steps),
            },
            OutputType::Composite => Artifact::Composite {
                parts: group_by_merge_family(steps)
                    .into_iter()
                    .map(|(family, group)| self.merge(family_output_type(family), &group))
                    .collect(),
            },
            OutputType::Report | OutputType::Auto => Artifact::Report {
                text: concatenate_with_headings(steps),
            },
        }
    }
}

fn text_of(step: &Step) -> &str {
    step.output_payload
        .as_ref()
        .and_then(|v| v.as_str())
        .unwrap_or_default()
}

fn code_file_of(step: &Step) -> CodeFile {
    CodeFile {
        path: format!("{}.txt", slugify(&step.name)),
        content: text_of(step).to_string(),
    }
}

fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

fn concatenate_with_headings(steps: &[&Step]) -> String {
    steps
        .iter()
        .map(|s| format!("## {}\n\n{}", s.name, text_of(s)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn later_of<'a>(a: &'a Step, b: &'a Step) -> &'a Step {
    match (a.completed_at, b.completed_at) {
        (Some(at_a), Some(at_b)) => if at_b >= at_a { b } else { a },
        (None, Some(_)) => b,
        _ => a,
    }
}

fn group_by_merge_family(steps: &[&Step]) -> Vec<(MergeFamily, Vec<&Step>)> {
    let mut groups: Vec<(MergeFamily, Vec<&Step>)> = Vec::new();
    for step in steps {
        let family = step.role.template().merge_family;
        match groups.iter_mut().find(|(f, _)| *f == family) {
            Some((_, group)) => group.push(step),
            None => groups.push((family, vec![step])),
        }
    }
    groups
}

fn family_output_type(family: MergeFamily) -> OutputType {
    match family {
        MergeFamily::Text => OutputType::Report,
        MergeFamily::Code => OutputType::Code,
        MergeFamily::Media => OutputType::Image,
    }
}

/// Majority role-family vote across the terminal steps, used when the task
/// did not pin an explicit output type (spec.md §4.6).
fn infer_output_type(steps: &[&Step]) -> OutputType {
    if steps.is_empty() {
        return OutputType::Report;
    }
    let families: Vec<MergeFamily> = steps.iter().map(|s| s.role.template().merge_family).collect();
    let unique: HashSet<_> = families.iter().collect();
    if unique.len() > 1 {
        return OutputType::Composite;
    }
    family_output_type(families[0])
}

/// Jaccard similarity over whitespace-separated tokens.
fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}
