// 该文件是 Huafeng （画风） 项目的一部分。
// src/dispatch.rs - 有界工作线程池调度
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  any::Any,
  panic::{self, AssertUnwindSafe},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
};

use crossbeam::channel;
use tracing::{debug, error, info, warn};

use crate::job::JobId;

/// 任务未能正常执行的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupted {
  Cancelled,
  Panicked(String),
}

/// 取消标记，只影响尚未开始的任务
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  /// 处理一次中断信号，返回此前是否已经取消过
  pub fn interrupt(&self) -> bool {
    self.0.swap(true, Ordering::SeqCst)
  }
}

/// 一个任务的结果
#[derive(Debug)]
pub struct Completed<R, E> {
  pub id: JobId,
  pub result: Result<R, E>,
}

/// 固定大小的工作线程池，每个提交的任务恰好产生一个结果
#[derive(Debug, Clone)]
pub struct Dispatcher {
  workers: usize,
  cancel: Option<CancelToken>,
}

impl Dispatcher {
  pub fn new(workers: usize) -> Self {
    Self {
      workers: workers.max(1),
      cancel: None,
    }
  }

  pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
    self.cancel = Some(token);
    self
  }

  pub fn workers(&self) -> usize {
    self.workers
  }

  /// 运行所有任务，结果按完成顺序返回
  ///
  /// 任务中的 panic 在任务边界被捕获，转换为该任务的错误。
  pub fn run_all<T, R, E, F>(&self, jobs: Vec<(JobId, T)>, run: F) -> Vec<Completed<R, E>>
  where
    T: Send,
    R: Send,
    E: From<Interrupted> + Send,
    F: Fn(JobId, T) -> Result<R, E> + Sync,
  {
    let total = jobs.len();
    if total == 0 {
      return Vec::new();
    }

    let (task_tx, task_rx) = channel::unbounded();
    let (result_tx, result_rx) = channel::unbounded();
    for job in jobs {
      // 接收端仍在本函数内，发送不会失败
      let _ = task_tx.send(job);
    }
    drop(task_tx);

    let workers = self.workers.min(total);
    info!("调度 {} 个任务到 {} 个工作线程", total, workers);

    let execute = |id: JobId, task: T| -> Result<R, E> {
      if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
        warn!("任务 {} 已取消", id);
        return Err(E::from(Interrupted::Cancelled));
      }
      match panic::catch_unwind(AssertUnwindSafe(|| run(id, task))) {
        Ok(result) => result,
        Err(payload) => {
          let message = panic_message(payload.as_ref());
          error!("任务 {} 崩溃: {}", id, message);
          Err(E::from(Interrupted::Panicked(message)))
        }
      }
    };

    thread::scope(|scope| {
      for worker in 0..workers {
        let task_rx = task_rx.clone();
        let result_tx = result_tx.clone();
        let execute = &execute;
        let spawned = thread::Builder::new()
          .name(format!("huafeng-worker-{}", worker))
          .spawn_scoped(scope, move || {
            for (id, task) in task_rx.iter() {
              debug!("工作线程 {} 开始任务 {}", worker, id);
              let result = execute(id, task);
              let _ = result_tx.send(Completed { id, result });
            }
          });
        if let Err(e) = spawned {
          error!("无法创建工作线程 {}: {}", worker, e);
        }
      }
    });

    // 没有任何工作线程创建成功时，剩余任务在当前线程执行
    for (id, task) in task_rx.try_iter() {
      let result = execute(id, task);
      let _ = result_tx.send(Completed { id, result });
    }
    drop(result_tx);

    result_rx.try_iter().collect()
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "未知错误".to_string()
  }
}

#[cfg(test)]
mod tests {
  use std::{
    collections::HashSet,
    sync::{
      Mutex,
      atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
  };

  use super::*;

  #[derive(Debug, PartialEq, Eq)]
  enum TestError {
    Failed,
    Interrupted(Interrupted),
  }

  impl From<Interrupted> for TestError {
    fn from(interrupted: Interrupted) -> Self {
      TestError::Interrupted(interrupted)
    }
  }

  fn jobs(n: usize) -> Vec<(JobId, usize)> {
    (0..n).map(|i| (JobId(i), i)).collect()
  }

  #[test]
  fn test_every_job_yields_one_result() {
    let dispatcher = Dispatcher::new(2);
    let results = dispatcher.run_all(jobs(7), |_, value| Ok::<_, TestError>(value * 10));

    assert_eq!(results.len(), 7);
    let ids: HashSet<_> = results.iter().map(|c| c.id).collect();
    assert_eq!(ids.len(), 7);
    for completed in &results {
      assert_eq!(completed.result, Ok(completed.id.0 * 10));
    }
  }

  #[test]
  fn test_pool_is_bounded() {
    let dispatcher = Dispatcher::new(2);
    let running = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);
    let threads = Mutex::new(HashSet::new());

    let results = dispatcher.run_all(jobs(6), |_, _| {
      let now = running.fetch_add(1, Ordering::SeqCst) + 1;
      peak.fetch_max(now, Ordering::SeqCst);
      threads.lock().unwrap().insert(thread::current().id());
      thread::sleep(Duration::from_millis(20));
      running.fetch_sub(1, Ordering::SeqCst);
      Ok::<_, TestError>(())
    });

    assert_eq!(results.len(), 6);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(threads.lock().unwrap().len() <= 2);
  }

  #[test]
  fn test_failures_and_panics_are_contained() {
    let dispatcher = Dispatcher::new(3);
    let mut results = dispatcher.run_all(jobs(4), |id, _| match id.0 {
      1 => Err(TestError::Failed),
      2 => panic!("boom"),
      _ => Ok(id.0),
    });
    results.sort_by_key(|c| c.id);

    assert_eq!(results.len(), 4);
    assert_eq!(results[0].result, Ok(0));
    assert_eq!(results[1].result, Err(TestError::Failed));
    assert_eq!(
      results[2].result,
      Err(TestError::Interrupted(Interrupted::Panicked("boom".to_string())))
    );
    assert_eq!(results[3].result, Ok(3));
  }

  #[test]
  fn test_cancel_skips_queued_jobs() {
    let token = CancelToken::new();
    let dispatcher = Dispatcher::new(1).with_cancel_token(token.clone());
    let results = dispatcher.run_all(jobs(3), |id, _| {
      token.cancel();
      Ok::<_, TestError>(id.0)
    });

    assert_eq!(results.len(), 3);
    let cancelled = results
      .iter()
      .filter(|c| c.result == Err(TestError::Interrupted(Interrupted::Cancelled)))
      .count();
    assert_eq!(cancelled, 2);
  }

  #[test]
  fn test_second_interrupt_is_reported() {
    let token = CancelToken::new();
    let shared = token.clone();
    assert!(!shared.interrupt());
    assert!(token.is_cancelled());
    assert!(shared.interrupt());
  }

  #[test]
  fn test_zero_workers_and_no_jobs() {
    let dispatcher = Dispatcher::new(0);
    assert_eq!(dispatcher.workers(), 1);
    assert_eq!(dispatcher.run_all(jobs(2), |_, v| Ok::<_, TestError>(v)).len(), 2);
    assert!(
      dispatcher
        .run_all(Vec::<(JobId, ())>::new(), |_, _| Ok::<_, TestError>(()))
        .is_empty()
    );
  }
}
