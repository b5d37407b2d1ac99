use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::errors::AppError;
use crate::hierarchy;
use crate::models::task::{ExtensionRequest, ExtensionStatus, Task, TaskStatus};
use crate::models::user::User;
use crate::store::Entities;
use crate::utils::validation::{non_blank, require};

#[derive(Deserialize, Validate, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    #[validate(length(min = 1, max = 256))]
    pub title: String,
    #[validate(length(max = 4000))]
    #[serde(default)]
    pub description: Option<String>,
    #[validate(length(min = 1))]
    pub primary_assignee_ids: Vec<String>,
    #[serde(default)]
    pub support_assignee_ids: Vec<String>,
    pub deadline: DateTime<Utc>,
}

#[derive(Deserialize, Validate, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    #[validate(range(min = 0, max = 100))]
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[validate(length(min = 1, max = 256))]
    #[serde(default)]
    pub title: Option<String>,
    #[validate(length(max = 4000))]
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Validate, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionInput {
    pub requested_date: DateTime<Utc>,
    #[validate(length(min = 1, max = 1000))]
    pub reason: String,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionDecision {
    pub approve: bool,
}

fn find_task(entities: &Entities, task_id: &str) -> Result<Task, AppError> {
    entities
        .task(task_id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))
}

fn store_task(entities: &mut Entities, task: &Task) {
    if let Some(slot) = entities.tasks.iter_mut().find(|t| t.id == task.id) {
        *slot = task.clone();
    }
}

fn status_for_progress(current: TaskStatus, progress: u8) -> TaskStatus {
    match (current, progress) {
        (_, 100) => TaskStatus::Completed,
        (TaskStatus::Completed, _) => TaskStatus::InProgress,
        (TaskStatus::Pending, p) if p > 0 => TaskStatus::InProgress,
        (status, _) => status,
    }
}

/// Tasks the actor may see: all for the system admin, otherwise tasks they take part
/// in plus tasks assigned to users inside their administrative scope.
pub fn visible_tasks<'a>(entities: &'a Entities, actor: &User) -> Result<Vec<&'a Task>, AppError> {
    if actor.is_system_admin() {
        return Ok(entities.tasks.iter().collect());
    }
    let scoped: HashSet<&str> = hierarchy::visible_users(&entities.units, &entities.users, actor)?
        .into_iter()
        .map(|user| user.id.as_str())
        .collect();
    Ok(entities
        .tasks
        .iter()
        .filter(|task| task.involves(&actor.id) || task.assignee_ids().any(|id| scoped.contains(id.as_str())))
        .collect())
}

fn is_overdue(task: &Task, now: DateTime<Utc>) -> bool {
    !matches!(task.status, TaskStatus::Completed | TaskStatus::Overdue) && task.deadline < now
}

pub fn any_overdue(tasks: &[Task], now: DateTime<Utc>) -> bool {
    tasks.iter().any(|task| is_overdue(task, now))
}

pub fn mark_overdue(tasks: &mut [Task], now: DateTime<Utc>) -> Vec<Task> {
    let mut changed = Vec::new();
    for task in tasks.iter_mut() {
        if is_overdue(task, now) {
            task.status = TaskStatus::Overdue;
            changed.push(task.clone());
        }
    }
    changed
}

pub fn create_task(entities: &mut Entities, actor: &User, input: NewTask, now: DateTime<Utc>) -> Result<Task, AppError> {
    let title = require(&input.title, "Title")?;
    if input.primary_assignee_ids.is_empty() {
        return Err(AppError::BadRequest("At least one primary assignee is required".to_string()));
    }
    if input.deadline <= now {
        return Err(AppError::BadRequest("Deadline must be in the future".to_string()));
    }
    for id in input.primary_assignee_ids.iter().chain(&input.support_assignee_ids) {
        if entities.user(id).is_none() {
            return Err(AppError::BadRequest(format!("Assignee {} does not exist", id)));
        }
    }

    let mut support = input.support_assignee_ids;
    support.retain(|id| !input.primary_assignee_ids.contains(id));

    let task = Task {
        id: Uuid::new_v4().to_string(),
        title,
        description: non_blank(input.description.as_deref()),
        assigner_id: actor.id.clone(),
        primary_assignee_ids: input.primary_assignee_ids,
        support_assignee_ids: support,
        deadline: input.deadline,
        status: TaskStatus::Pending,
        progress: 0,
        extension_request: None,
        created_at: now,
    };
    entities.tasks.push(task.clone());
    log::info!("{} created task {}", actor.username, task.id);
    Ok(task)
}

pub fn update_task(
    entities: &mut Entities,
    actor: &User,
    task_id: &str,
    input: TaskUpdate,
    now: DateTime<Utc>,
) -> Result<Task, AppError> {
    let mut task = find_task(entities, task_id)?;
    let is_owner = task.assigner_id == actor.id || actor.is_system_admin();
    if !is_owner && !task.is_assignee(&actor.id) {
        return Err(AppError::Forbidden("You are not part of this task".to_string()));
    }

    let edits_definition = input.title.is_some() || input.description.is_some() || input.deadline.is_some();
    if edits_definition && !is_owner {
        return Err(AppError::Forbidden("Only the assigner can edit the task definition".to_string()));
    }
    if let Some(title) = &input.title {
        task.title = require(title, "Title")?;
    }
    if let Some(description) = &input.description {
        task.description = non_blank(Some(description));
    }
    if let Some(deadline) = input.deadline {
        if deadline <= now {
            return Err(AppError::BadRequest("Deadline must be in the future".to_string()));
        }
        task.deadline = deadline;
        if task.status == TaskStatus::Overdue {
            task.status = if task.progress > 0 { TaskStatus::InProgress } else { TaskStatus::Pending };
        }
    }

    if let Some(progress) = input.progress {
        if progress > 100 {
            return Err(AppError::BadRequest("Progress must be between 0 and 100".to_string()));
        }
        task.progress = progress;
    }
    match input.status {
        Some(TaskStatus::Overdue) => {
            return Err(AppError::BadRequest("Overdue is set automatically".to_string()));
        }
        Some(TaskStatus::Completed) => {
            task.status = TaskStatus::Completed;
            task.progress = 100;
        }
        Some(status) => task.status = status,
        None if input.progress.is_some() => task.status = status_for_progress(task.status, task.progress),
        None => {}
    }
    if task.progress == 100 {
        task.status = TaskStatus::Completed;
    }

    store_task(entities, &task);
    log::info!("{} updated task {}", actor.username, task.id);
    Ok(task)
}

pub fn request_extension(
    entities: &mut Entities,
    actor: &User,
    task_id: &str,
    input: ExtensionInput,
) -> Result<Task, AppError> {
    let mut task = find_task(entities, task_id)?;
    if !task.primary_assignee_ids.contains(&actor.id) {
        return Err(AppError::Forbidden("Only a primary assignee can request an extension".to_string()));
    }
    if task.status == TaskStatus::Completed {
        return Err(AppError::BadRequest("Task is already completed".to_string()));
    }
    if matches!(&task.extension_request, Some(request) if request.status == ExtensionStatus::Pending) {
        return Err(AppError::Conflict("An extension request is already pending".to_string()));
    }
    let reason = require(&input.reason, "Reason")?;
    if input.requested_date <= task.deadline {
        return Err(AppError::BadRequest("Requested date must be after the current deadline".to_string()));
    }

    task.extension_request = Some(ExtensionRequest {
        requested_date: input.requested_date,
        reason,
        status: ExtensionStatus::Pending,
    });
    store_task(entities, &task);
    log::info!("{} requested an extension on task {}", actor.username, task.id);
    Ok(task)
}

pub fn decide_extension(
    entities: &mut Entities,
    actor: &User,
    task_id: &str,
    decision: ExtensionDecision,
) -> Result<Task, AppError> {
    let mut task = find_task(entities, task_id)?;
    if task.assigner_id != actor.id && !actor.is_system_admin() {
        return Err(AppError::Forbidden("Only the assigner can decide on extensions".to_string()));
    }
    let request = match task.extension_request.as_mut() {
        Some(request) if request.status == ExtensionStatus::Pending => request,
        _ => return Err(AppError::BadRequest("No pending extension request".to_string())),
    };

    if decision.approve {
        request.status = ExtensionStatus::Approved;
        task.deadline = request.requested_date;
        if task.status == TaskStatus::Overdue {
            task.status = TaskStatus::InProgress;
        }
    } else {
        request.status = ExtensionStatus::Rejected;
    }
    store_task(entities, &task);
    log::info!(
        "{} {} the extension on task {}",
        actor.username,
        if decision.approve { "approved" } else { "rejected" },
        task.id
    );
    Ok(task)
}

pub fn delete_task(entities: &mut Entities, actor: &User, task_id: &str) -> Result<Task, AppError> {
    let task = find_task(entities, task_id)?;
    if task.assigner_id != actor.id && !actor.is_system_admin() {
        return Err(AppError::Forbidden("Only the assigner can delete a task".to_string()));
    }
    entities.tasks.retain(|t| t.id != task_id);
    log::info!("{} deleted task {}", actor.username, task_id);
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::fixtures::{admin, branch, user};
    use chrono::Duration;

    fn entities() -> Entities {
        Entities {
            units: branch(),
            users: vec![
                admin("A"),
                user("boss", "B", false),
                user("worker", "C", false),
                user("helper", "D", false),
                user("sub", "B", true),
            ],
            ..Entities::default()
        }
    }

    fn new_task(now: DateTime<Utc>) -> NewTask {
        NewTask {
            title: "Quarterly report".to_string(),
            description: None,
            primary_assignee_ids: vec!["worker".to_string()],
            support_assignee_ids: vec!["helper".to_string(), "worker".to_string()],
            deadline: now + Duration::days(3),
        }
    }

    #[test]
    fn creation_validates_assignees_and_deadline() {
        let now = Utc::now();
        let mut entities = entities();
        let boss = user("boss", "B", false);

        let task = create_task(&mut entities, &boss, new_task(now), now).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.support_assignee_ids, vec!["helper".to_string()]);

        let mut ghost = new_task(now);
        ghost.primary_assignee_ids = vec!["ghost".to_string()];
        assert!(create_task(&mut entities, &boss, ghost, now).is_err());

        let mut late = new_task(now);
        late.deadline = now - Duration::hours(1);
        assert!(create_task(&mut entities, &boss, late, now).is_err());
        assert_eq!(entities.tasks.len(), 1);
    }

    #[test]
    fn progress_drives_status() {
        let now = Utc::now();
        let mut entities = entities();
        let boss = user("boss", "B", false);
        let worker = user("worker", "C", false);
        let task = create_task(&mut entities, &boss, new_task(now), now).unwrap();

        let update = TaskUpdate {
            progress: Some(40),
            ..TaskUpdate::default()
        };
        let task = update_task(&mut entities, &worker, &task.id, update, now).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);

        let update = TaskUpdate {
            progress: Some(100),
            ..TaskUpdate::default()
        };
        let task = update_task(&mut entities, &worker, &task.id, update, now).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        let rename = TaskUpdate {
            title: Some("Renamed".to_string()),
            ..TaskUpdate::default()
        };
        assert!(matches!(
            update_task(&mut entities, &worker, &task.id, rename, now),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn full_progress_completes_whatever_status_is_sent() {
        let now = Utc::now();
        let mut entities = entities();
        let boss = user("boss", "B", false);
        let worker = user("worker", "C", false);
        let task = create_task(&mut entities, &boss, new_task(now), now).unwrap();

        let update = TaskUpdate {
            progress: Some(100),
            status: Some(TaskStatus::InProgress),
            ..TaskUpdate::default()
        };
        let task = update_task(&mut entities, &worker, &task.id, update, now).unwrap();
        assert_eq!(task.progress, 100);
        assert_eq!(task.status, TaskStatus::Completed);

        let reopen = TaskUpdate {
            status: Some(TaskStatus::InProgress),
            ..TaskUpdate::default()
        };
        let task = update_task(&mut entities, &worker, &task.id, reopen, now).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        let reopen = TaskUpdate {
            progress: Some(60),
            status: Some(TaskStatus::InProgress),
            ..TaskUpdate::default()
        };
        let task = update_task(&mut entities, &worker, &task.id, reopen, now).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(entities.task(&task.id).unwrap().status, TaskStatus::InProgress);
    }

    #[test]
    fn overdue_sweep_skips_completed() {
        let now = Utc::now();
        let mut entities = entities();
        let boss = user("boss", "B", false);
        let first = create_task(&mut entities, &boss, new_task(now), now).unwrap();
        create_task(&mut entities, &boss, new_task(now), now).unwrap();
        entities.tasks[0].status = TaskStatus::Completed;

        let later = now + Duration::days(4);
        assert!(!any_overdue(&entities.tasks, now));
        assert!(any_overdue(&entities.tasks, later));
        let changed = mark_overdue(&mut entities.tasks, later);
        assert_eq!(changed.len(), 1);
        assert_ne!(changed[0].id, first.id);
        assert!(!any_overdue(&entities.tasks, later));
        assert!(mark_overdue(&mut entities.tasks, later).is_empty());
    }

    #[test]
    fn extension_flow() {
        let now = Utc::now();
        let mut entities = entities();
        let boss = user("boss", "B", false);
        let worker = user("worker", "C", false);
        let helper = user("helper", "D", false);
        let task = create_task(&mut entities, &boss, new_task(now), now).unwrap();
        let requested = task.deadline + Duration::days(5);

        let input = ExtensionInput {
            requested_date: requested,
            reason: "Waiting on data".to_string(),
        };
        assert!(matches!(
            request_extension(&mut entities, &helper, &task.id, input.clone()),
            Err(AppError::Forbidden(_))
        ));
        request_extension(&mut entities, &worker, &task.id, input.clone()).unwrap();
        assert!(matches!(
            request_extension(&mut entities, &worker, &task.id, input),
            Err(AppError::Conflict(_))
        ));

        mark_overdue(&mut entities.tasks, task.deadline + Duration::hours(1));
        assert!(decide_extension(&mut entities, &worker, &task.id, ExtensionDecision { approve: true }).is_err());
        let decided = decide_extension(&mut entities, &boss, &task.id, ExtensionDecision { approve: true }).unwrap();
        assert_eq!(decided.deadline, requested);
        assert_eq!(decided.status, TaskStatus::InProgress);
        assert_eq!(
            decided.extension_request.map(|r| r.status),
            Some(ExtensionStatus::Approved)
        );
    }

    #[test]
    fn visibility_follows_participation_and_scope() {
        let now = Utc::now();
        let mut entities = entities();
        let boss = user("boss", "B", false);
        create_task(&mut entities, &boss, new_task(now), now).unwrap();

        assert_eq!(visible_tasks(&entities, &user("worker", "C", false)).unwrap().len(), 1);
        assert_eq!(visible_tasks(&entities, &user("sub", "B", true)).unwrap().len(), 1);
        assert_eq!(visible_tasks(&entities, &user("stranger", "E", false)).unwrap().len(), 0);
        assert_eq!(visible_tasks(&entities, &admin("A")).unwrap().len(), 1);
    }

    #[test]
    fn only_assigner_deletes() {
        let now = Utc::now();
        let mut entities = entities();
        let boss = user("boss", "B", false);
        let task = create_task(&mut entities, &boss, new_task(now), now).unwrap();
        assert!(delete_task(&mut entities, &user("worker", "C", false), &task.id).is_err());
        delete_task(&mut entities, &boss, &task.id).unwrap();
        assert!(entities.tasks.is_empty());
    }
}
