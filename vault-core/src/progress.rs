use crate::constants::progress;
use crate::events::{JobSnapshot, ProgressEvent};
use crate::job::JobState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

type ObserverMap = HashMap<u64, mpsc::Sender<ProgressEvent>>;

/// 进度广播通道
///
/// 将任务事件推送给所有已接入的观察者；中途接入的观察者先收到
/// 一条 sync_state 回放消息（当前运行标志、日志缓冲、命令行），
/// 再接收后续实时事件，两者之间不会插入乱序事件。
#[derive(Clone)]
pub struct ProgressChannel {
    state: Arc<JobState>,
    observers: Arc<Mutex<ObserverMap>>,
    next_id: Arc<AtomicU64>,
    queue_capacity: usize,
}

/// 观察者句柄：接收回放与实时事件，丢弃时自动退订
pub struct ProgressObserver {
    id: u64,
    receiver: mpsc::Receiver<ProgressEvent>,
    observers: Arc<Mutex<ObserverMap>>,
}

impl ProgressObserver {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 接收下一条事件；通道关闭（已退订）时返回 None
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }

    /// 非阻塞接收（测试与轮询场景）
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for ProgressObserver {
    fn drop(&mut self) {
        lock_observers(&self.observers).remove(&self.id);
    }
}

// 持锁线程panic后仍可继续广播，缓冲内容此时依然一致
fn lock_observers(observers: &Mutex<ObserverMap>) -> MutexGuard<'_, ObserverMap> {
    observers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ProgressChannel {
    pub fn new(state: Arc<JobState>) -> Self {
        Self::with_queue_capacity(state, progress::OBSERVER_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(state: Arc<JobState>, queue_capacity: usize) -> Self {
        Self {
            state,
            observers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            queue_capacity,
        }
    }

    /// 接入一个新观察者
    ///
    /// 回放消息在持有注册表锁期间入队，因此任何随后 publish 的
    /// 实时事件都排在回放之后，观察者不会错过也不会乱序。
    /// 仅在有任务运行或缓冲区非空时发送回放，空闲进程不打扰客户端。
    pub fn subscribe(&self) -> ProgressObserver {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut observers = lock_observers(&self.observers);
        let snapshot = self.state.snapshot();
        if snapshot.has_replayable_state() {
            // 新建通道容量必不为零，回放消息不会失败
            let _ = sender.try_send(ProgressEvent::SyncState { state: snapshot });
        }
        observers.insert(id, sender);
        drop(observers);

        tracing::debug!(observer_id = id, "观察者已接入");
        ProgressObserver {
            id,
            receiver,
            observers: Arc::clone(&self.observers),
        }
    }

    /// 主动退订
    pub fn unsubscribe(&self, id: u64) {
        lock_observers(&self.observers).remove(&id);
        tracing::debug!(observer_id = id, "观察者已退订");
    }

    /// 发布事件：先更新共享任务状态，再逐个观察者尽力投递
    ///
    /// 慢观察者（队列满）只丢自己的事件，绝不阻塞其他观察者；
    /// 已断开的观察者顺手清理。
    pub fn publish(&self, event: ProgressEvent) {
        // 状态更新和投递必须在同一个临界区里：否则并发 subscribe
        // 可能先拿到含本事件的快照、再收到同一事件的实时投递
        let mut observers = lock_observers(&self.observers);
        self.state.apply(&event);
        let mut disconnected = Vec::new();

        for (id, sender) in observers.iter() {
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(observer_id = id, "观察者队列已满，丢弃事件");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    disconnected.push(*id);
                }
            }
        }

        for id in disconnected {
            observers.remove(&id);
            tracing::debug!(observer_id = id, "观察者已断开，移除");
        }
    }

    /// 当前任务状态快照
    pub fn job_state(&self) -> JobSnapshot {
        self.state.snapshot()
    }

    pub fn observer_count(&self) -> usize {
        lock_observers(&self.observers).len()
    }
}
