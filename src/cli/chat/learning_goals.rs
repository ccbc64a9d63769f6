use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Progress added per completed topic
pub const TOPIC_PROGRESS_STEP: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Topic {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StudyPlan {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub topics: Vec<Topic>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LearningGoal {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub study_plans: Vec<StudyPlan>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LearningGoal {
    pub fn progress(&self) -> f64 {
        self.progress.unwrap_or(0.0)
    }

    /// Topics of the first study plan, which is the one progress is tracked on
    pub fn topics(&self) -> &[Topic] {
        self.study_plans
            .first()
            .map(|plan| plan.topics.as_slice())
            .unwrap_or_default()
    }
}

/// How completing a topic moves a goal's progress.
///
/// The default matches what the service's web client does: a fixed step per
/// call with no upper bound and no check for a topic already being complete.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressPolicy {
    pub step: f64,
    pub clamp_to_100: bool,
    pub guard_repeat: bool,
}

impl Default for ProgressPolicy {
    fn default() -> Self {
        Self {
            step: TOPIC_PROGRESS_STEP,
            clamp_to_100: false,
            guard_repeat: false,
        }
    }
}

impl ProgressPolicy {
    pub fn bounded() -> Self {
        Self {
            clamp_to_100: true,
            guard_repeat: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TopicCompletion {
    Completed { progress: f64 },
    AlreadyCompleted,
    GoalNotFound,
    TopicNotFound,
}

pub fn mark_topic_completed(
    goals: &mut [LearningGoal],
    goal_name: &str,
    topic_index: usize,
    policy: &ProgressPolicy,
) -> TopicCompletion {
    let Some(goal) = goals.iter_mut().find(|g| g.name == goal_name) else {
        warn!("No learning goal named {:?}", goal_name);
        return TopicCompletion::GoalNotFound;
    };

    let Some(topic) = goal
        .study_plans
        .first_mut()
        .and_then(|plan| plan.topics.get_mut(topic_index))
    else {
        warn!("Goal {:?} has no topic {}", goal_name, topic_index);
        return TopicCompletion::TopicNotFound;
    };

    if policy.guard_repeat && topic.completed {
        return TopicCompletion::AlreadyCompleted;
    }
    topic.completed = true;

    let mut progress = goal.progress() + policy.step;
    if policy.clamp_to_100 {
        progress = progress.min(100.0);
    }
    goal.progress = Some(progress);

    debug!("Goal {:?} progress now {}", goal_name, progress);
    TopicCompletion::Completed { progress }
}

/// A generated study plan as delivered in a learning-path answer.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct LearningPath {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub course_duration: Option<String>,
    #[serde(default)]
    pub topics: Vec<Topic>,
}

#[derive(Deserialize)]
struct LearningPathEnvelope {
    content: LearningPath,
}

impl LearningPath {
    /// Accepts the bare plan or the `{"response": "JSON", "content": {...}}`
    /// envelope returned by the ask endpoint.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(envelope) = serde_json::from_str::<LearningPathEnvelope>(text) {
            return Some(envelope.content);
        }
        serde_json::from_str::<LearningPath>(text)
            .ok()
            .filter(|path| !path.topics.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn goal(progress: Option<f64>, topics: usize) -> LearningGoal {
        LearningGoal {
            name: "Rust".into(),
            progress,
            study_plans: vec![StudyPlan {
                name: "Rust basics".into(),
                topics: (0..topics)
                    .map(|i| Topic {
                        name: format!("Topic {}", i + 1),
                        ..Topic::default()
                    })
                    .collect(),
                ..StudyPlan::default()
            }],
            ..LearningGoal::default()
        }
    }

    #[test]
    fn test_progress_80_to_100() {
        let mut goals = vec![goal(Some(80.0), 5)];
        let result = mark_topic_completed(&mut goals, "Rust", 4, &ProgressPolicy::default());

        assert_eq!(result, TopicCompletion::Completed { progress: 100.0 });
        assert!(goals[0].topics()[4].completed);
        assert_eq!(goals[0].progress, Some(100.0));
    }

    // The web client never bounds progress or checks for repeats, and the
    // default policy keeps that: a second call on the same topic goes past 100.
    #[test]
    fn test_default_policy_is_unbounded() {
        let mut goals = vec![goal(Some(80.0), 5)];
        let policy = ProgressPolicy::default();
        mark_topic_completed(&mut goals, "Rust", 4, &policy);
        let result = mark_topic_completed(&mut goals, "Rust", 4, &policy);

        assert_eq!(result, TopicCompletion::Completed { progress: 120.0 });
    }

    #[test]
    fn test_clamped_policy_caps_at_100() {
        let mut goals = vec![goal(Some(90.0), 5)];
        let policy = ProgressPolicy {
            clamp_to_100: true,
            ..ProgressPolicy::default()
        };

        let result = mark_topic_completed(&mut goals, "Rust", 0, &policy);
        assert_eq!(result, TopicCompletion::Completed { progress: 100.0 });
        let result = mark_topic_completed(&mut goals, "Rust", 1, &policy);
        assert_eq!(result, TopicCompletion::Completed { progress: 100.0 });
    }

    #[test]
    fn test_guarded_policy_ignores_repeat() {
        let mut goals = vec![goal(Some(80.0), 5)];
        let policy = ProgressPolicy::bounded();

        mark_topic_completed(&mut goals, "Rust", 2, &policy);
        let result = mark_topic_completed(&mut goals, "Rust", 2, &policy);

        assert_eq!(result, TopicCompletion::AlreadyCompleted);
        assert_eq!(goals[0].progress, Some(100.0));
    }

    #[test]
    fn test_missing_progress_starts_at_zero() {
        let mut goals = vec![goal(None, 2)];
        let result = mark_topic_completed(&mut goals, "Rust", 0, &ProgressPolicy::default());
        assert_eq!(result, TopicCompletion::Completed { progress: 20.0 });
    }

    #[test]
    fn test_unknown_goal_or_topic_is_noop() {
        let mut goals = vec![goal(Some(40.0), 2)];
        let before = goals.clone();
        let policy = ProgressPolicy::default();

        assert_eq!(
            mark_topic_completed(&mut goals, "Go", 0, &policy),
            TopicCompletion::GoalNotFound
        );
        assert_eq!(
            mark_topic_completed(&mut goals, "Rust", 7, &policy),
            TopicCompletion::TopicNotFound
        );
        assert_eq!(goals, before);
    }

    #[test]
    fn test_deserialize_goal_keeps_unknown_fields() {
        let value = json!({
            "goal_id": "g1",
            "name": "Rust",
            "description": "Systems programming",
            "progress": 40.0,
            "study_plans": [{
                "name": "Rust basics",
                "course_duration": "4 weeks",
                "topics": [{"name": "Ownership", "description": "Moves", "subtopics": []}]
            }]
        });

        let goal: LearningGoal = serde_json::from_value(value).unwrap();
        assert_eq!(goal.progress(), 40.0);
        assert_eq!(goal.topics()[0].name, "Ownership");
        assert!(!goal.topics()[0].completed);
        assert_eq!(goal.extra.get("goal_id"), Some(&json!("g1")));
        assert!(goal.topics()[0].extra.contains_key("subtopics"));
    }

    #[test]
    fn test_parse_learning_path() {
        let bare = r#"{"name": "Rust", "course_duration": "4 weeks", "topics": [{"name": "Ownership"}]}"#;
        let path = LearningPath::parse(bare).unwrap();
        assert_eq!(path.name, "Rust");
        assert_eq!(path.course_duration.as_deref(), Some("4 weeks"));

        let wrapped = format!(r#"{{"response": "JSON", "content": {}}}"#, bare);
        assert_eq!(LearningPath::parse(&wrapped), Some(path));

        assert_eq!(LearningPath::parse("Recursion is..."), None);
    }
}
