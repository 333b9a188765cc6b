//! Task trees: named units of work composed sequentially or in parallel
//!
//! A `TaskTree` is itself a `Task`, so trees nest arbitrarily. Sequential trees stop
//! at the first failure; parallel trees always wait for every branch and collect
//! every failure.

use std::{fmt, future::Future};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use tracing::{debug, error, info};

const INDENT: &str = "    ";

#[async_trait]
pub trait Task: Send + Sync {
  fn describe(&self) -> String;

  async fn run(&self) -> Result<()>;

  /// Run the task, returning every error that occurred rather than a single one
  ///
  /// Trees override this so that nested failures surface individually
  async fn run_all(&self) -> Vec<anyhow::Error> {
    match self.run().await {
      Ok(()) => Vec::new(),
      Err(err) => vec![err],
    }
  }
}

type TaskFn = Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A task defined by a description and an async closure
pub struct GenericTask {
  description: String,
  call: TaskFn,
}

impl GenericTask {
  pub fn new<F, Fut>(description: impl Into<String>, call: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    Self {
      description: description.into(),
      call: Box::new(move || Box::pin(call())),
    }
  }
}

#[async_trait]
impl Task for GenericTask {
  fn describe(&self) -> String {
    self.description.clone()
  }

  async fn run(&self) -> Result<()> {
    (self.call)().await
  }
}

/// All of the errors reported by the tasks of a tree
#[derive(Debug)]
pub struct TaskErrors(pub Vec<anyhow::Error>);

impl fmt::Display for TaskErrors {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let messages: Vec<String> = self.0.iter().map(|e| format!("{e:#}")).collect();
    write!(f, "{}", messages.join("; "))
  }
}

impl std::error::Error for TaskErrors {}

#[derive(Default)]
pub struct TaskTree {
  tasks: Vec<Box<dyn Task>>,
  pub parallel: bool,
  pub plan_mode: bool,
  pub is_sub_task: bool,
}

impl TaskTree {
  pub fn sequential() -> Self {
    Self::default()
  }

  pub fn parallel() -> Self {
    Self {
      parallel: true,
      ..Default::default()
    }
  }

  /// Mark the tree as nested inside another tree, which changes how it is described
  pub fn into_sub_task(mut self) -> Self {
    self.is_sub_task = true;
    self
  }

  pub fn append(&mut self, task: impl Task + 'static) {
    self.tasks.push(Box::new(task));
  }

  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  /// Run every task in the foreground and return all of the errors
  pub async fn do_all_sync(&self) -> Vec<anyhow::Error> {
    if self.is_empty() || self.plan_mode {
      debug!("no actual tasks");
      return Vec::new();
    }

    if self.parallel {
      self.do_parallel_tasks().await
    } else {
      self.do_sequential_tasks().await
    }
  }

  async fn do_parallel_tasks(&self) -> Vec<anyhow::Error> {
    debug!("waiting for {} parallel tasks to complete", self.tasks.len());
    let results = future::join_all(self.tasks.iter().map(|task| async move {
      let errs = do_single_task(task.as_ref()).await;
      if !errs.is_empty() {
        debug!(
          "failed task: {} (will continue until other parallel tasks are completed)",
          task.describe()
        );
      }
      errs
    }))
    .await;

    results.into_iter().flatten().collect()
  }

  async fn do_sequential_tasks(&self) -> Vec<anyhow::Error> {
    for task in &self.tasks {
      let errs = do_single_task(task.as_ref()).await;
      if !errs.is_empty() {
        debug!("failed task: {} (will not run other sequential tasks)", task.describe());
        return errs;
      }
    }
    Vec::new()
  }
}

async fn do_single_task(task: &dyn Task) -> Vec<anyhow::Error> {
  let desc = task.describe();
  debug!("started task: {desc}");
  let errs = task.run_all().await;
  if errs.is_empty() {
    debug!("completed task: {desc}");
  }
  errs
}

#[async_trait]
impl Task for TaskTree {
  fn describe(&self) -> String {
    if self.is_empty() {
      return "no tasks".to_string();
    }

    let descriptions: Vec<String> = self
      .tasks
      .iter()
      .map(|task| {
        let d = task.describe();
        d.strip_suffix('\n').map(str::to_string).unwrap_or(d)
      })
      .collect();

    let noun = if self.is_sub_task { "sub-task" } else { "task" };
    if descriptions.len() == 1 {
      if self.is_sub_task {
        return descriptions[0].clone();
      }
      return format!("1 {noun}: {{ {} }}", descriptions[0]);
    }

    let count = descriptions.len();
    let mode = if self.parallel { "parallel" } else { "sequential" };

    let (head, tail) = if self.is_sub_task {
      let head = format!("\n{INDENT}{count} {mode} {noun}s: {{ ");
      let mut tail = String::from("\n");
      for d in &descriptions {
        // nested trees are already indented once, push them one level deeper
        let d = if d.contains("sub-task") {
          let d = d.strip_prefix('\n').unwrap_or(d.as_str());
          d.split('\n').map(|line| format!("{INDENT}{line}")).collect::<Vec<_>>().join("\n")
        } else {
          format!("{INDENT}{INDENT}{d}")
        };
        tail.push_str(&format!("{d},\n"));
      }
      tail.push_str(&format!("{INDENT}}}"));
      (head, tail)
    } else {
      (
        format!("\n{count} {mode} {noun}s: {{ "),
        format!("{} \n}}", descriptions.join(", ")),
      )
    };

    let mut msg = head + &tail;
    if self.plan_mode {
      msg = format!("(plan) {msg}");
    }
    msg + "\n"
  }

  async fn run(&self) -> Result<()> {
    let errs = self.do_all_sync().await;
    if errs.is_empty() {
      Ok(())
    } else {
      Err(TaskErrors(errs).into())
    }
  }

  async fn run_all(&self) -> Vec<anyhow::Error> {
    self.do_all_sync().await
  }
}

/// Logs every error from a tree run and returns a single error naming what could not be deleted
pub fn handle_errors(errs: Vec<anyhow::Error>, subject: &str) -> anyhow::Error {
  info!("{} error(s) occurred while deleting {subject}", errs.len());
  for err in &errs {
    error!("{err:#}");
  }
  anyhow!("failed to delete {subject}")
}
