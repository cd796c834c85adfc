/// 事件推送系统 (Event Publisher)
///
/// 流水线线程 ──[有界队列, 满则丢最旧]──▶ 推送线程 ──[每个监听者一个有界队列]──▶ WebSocket 任务
///
/// - 流水线永不因推送而阻塞
/// - 单个监听者断开或过慢只影响它自己
/// - 同一监听者收到的事件保持 FIFO
pub mod websocket;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::crossing::CrossingEvent;
use crate::error::PublishError;

// ========== 流水线 → 推送线程 ==========

/// 创建事件队列
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (
        EventSender {
            tx,
            overflow: rx.clone(),
            dropped: Arc::new(AtomicU64::new(0)),
        },
        EventReceiver { rx },
    )
}

/// 生产端 (流水线持有)
pub struct EventSender {
    tx: Sender<CrossingEvent>,
    /// 用于队列满时弹出最旧事件
    overflow: Receiver<CrossingEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// 非阻塞发送; 队列满时丢弃最旧的未发送事件
    pub fn send(&self, event: CrossingEvent) {
        let mut event = event;
        loop {
            match self.tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if let Ok(oldest) = self.overflow.try_recv() {
                        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(
                            "⚠️ 事件队列已满, 丢弃最旧事件 #{} (累计丢弃 {})",
                            oldest.object_id, total
                        );
                    }
                    event = back;
                }
                // 自身持有接收端, 不会断开
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// 消费端 (推送线程持有)
pub struct EventReceiver {
    rx: Receiver<CrossingEvent>,
}

impl EventReceiver {
    /// 等待下一个事件; 所有生产端释放后返回 None
    pub fn recv(&self) -> Option<CrossingEvent> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<CrossingEvent> {
        self.rx.try_recv().ok()
    }
}

// ========== 监听者注册表 ==========

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(pub u64);

pub type ListenerReceiver = mpsc::Receiver<Arc<str>>;

struct ListenerInner {
    listeners: Mutex<BTreeMap<u64, mpsc::Sender<Arc<str>>>>,
    next_id: AtomicU64,
    capacity: usize,
}

/// 监听者集合 (连接任务注册/注销, 推送线程发送)
#[derive(Clone)]
pub struct ListenerSet {
    inner: Arc<ListenerInner>,
}

impl ListenerSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                listeners: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, mpsc::Sender<Arc<str>>>> {
        match self.inner.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn register(&self) -> (ListenerHandle, ListenerReceiver) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.lock().insert(id, tx);
        (ListenerHandle(id), rx)
    }

    pub fn unregister(&self, handle: ListenerHandle) -> bool {
        self.lock().remove(&handle.0).is_some()
    }

    /// 向单个监听者投递 (不阻塞)
    pub fn send(&self, handle: ListenerHandle, message: Arc<str>) -> Result<(), PublishError> {
        let tx = self
            .lock()
            .get(&handle.0)
            .cloned()
            .ok_or(PublishError::Closed(handle.0))?;
        tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PublishError::Full(handle.0),
            mpsc::error::TrySendError::Closed(_) => PublishError::Closed(handle.0),
        })
    }

    pub fn handles(&self) -> Vec<ListenerHandle> {
        self.lock().keys().map(|&id| ListenerHandle(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ========== 推送线程 ==========

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub events: u64,
    pub deliveries: u64,
    /// 因监听者队列满而未送达的次数
    pub skipped: u64,
    /// 因断开而注销的监听者数
    pub disconnected: u64,
}

pub struct EventPublisher;

impl EventPublisher {
    /// 启动推送线程; 所有 `EventSender` 释放后线程退出并返回统计
    pub fn spawn(
        events: EventReceiver,
        listeners: ListenerSet,
    ) -> std::io::Result<JoinHandle<PublisherStats>> {
        std::thread::Builder::new()
            .name("publisher".to_string())
            .spawn(move || Self::run(events, listeners))
    }

    pub fn run(events: EventReceiver, listeners: ListenerSet) -> PublisherStats {
        info!("📡 推送线程启动");
        let mut stats = PublisherStats::default();
        while let Some(event) = events.recv() {
            Self::dispatch(&event, &listeners, &mut stats);
        }
        info!(
            "📡 推送线程退出: {} 个事件, {} 次送达",
            stats.events, stats.deliveries
        );
        stats
    }

    /// 序列化一次, 向当前所有监听者投递
    pub fn dispatch(event: &CrossingEvent, listeners: &ListenerSet, stats: &mut PublisherStats) {
        stats.events += 1;
        let message: Arc<str> = match event.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                warn!("❌ {}", PublishError::from(e));
                return;
            }
        };

        for handle in listeners.handles() {
            match listeners.send(handle, Arc::clone(&message)) {
                Ok(()) => stats.deliveries += 1,
                Err(PublishError::Full(id)) => {
                    stats.skipped += 1;
                    warn!("⚠️ 监听者 #{} 处理过慢, 跳过事件 #{}", id, event.object_id);
                }
                Err(e) => {
                    if listeners.unregister(handle) {
                        stats.disconnected += 1;
                    }
                    debug!("{}", e);
                }
            }
        }
    }
}
