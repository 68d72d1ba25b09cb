// Task Queue Module
// Pipeline task identities, the bounded FIFO of pending work and the completed-task history

use core::fmt;

use thiserror::Error;

pub const TASK_QUEUE_CAPACITY: usize = 30;
pub const TASK_HISTORY_CAPACITY: usize = 10;

/// One step of the modem protocol pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Task {
    ScanNetworks = 1,
    DisableEcho = 2,
    ConnectToNetwork = 3,
    QueryStatusAndConnect = 4,
    QueryOwnIp = 5,
    SetOwnIp = 6,
    ConnectToServer = 7,
    AnnouncePayloadLength = 8,
    SendPayloadAwaitResponse = 9,
    QueryWifiMode = 10,
    SetStationMode = 11,
    CloseConnection = 12,
    QueryConnectionStatus = 13,
    ProbeServerAvailability = 14,
    EstablishLongPoll = 15,
    AwaitLongPoll = 16,
}

impl Task {
    /// Stable numeric id reported as `lastErrorTask`
    pub const fn id(self) -> u32 {
        self as u32
    }

    pub const fn name(self) -> &'static str {
        match self {
            Task::ScanNetworks => "scan_networks",
            Task::DisableEcho => "disable_echo",
            Task::ConnectToNetwork => "connect_to_network",
            Task::QueryStatusAndConnect => "query_status_and_connect",
            Task::QueryOwnIp => "query_own_ip",
            Task::SetOwnIp => "set_own_ip",
            Task::ConnectToServer => "connect_to_server",
            Task::AnnouncePayloadLength => "announce_payload_length",
            Task::SendPayloadAwaitResponse => "send_payload_await_response",
            Task::QueryWifiMode => "query_wifi_mode",
            Task::SetStationMode => "set_station_mode",
            Task::CloseConnection => "close_connection",
            Task::QueryConnectionStatus => "query_connection_status",
            Task::ProbeServerAvailability => "probe_server_availability",
            Task::EstablishLongPoll => "establish_long_poll",
            Task::AwaitLongPoll => "await_long_poll",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("task queue full, {0} not queued")]
    Full(Task),
    #[error("task queue full, {0} dropped from the tail")]
    TailDropped(Task),
}

/// Bounded FIFO of pending tasks. `None` marks the first free slot; live
/// entries are always contiguous from index 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQueue {
    slots: [Option<Task>; TASK_QUEUE_CAPACITY],
}

impl TaskQueue {
    pub const fn new() -> Self {
        Self {
            slots: [None; TASK_QUEUE_CAPACITY],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().take_while(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots[0].is_none()
    }

    /// Second-to-last slot occupied: recovery must run before a real overflow
    pub fn is_near_full(&self) -> bool {
        self.slots[TASK_QUEUE_CAPACITY - 2].is_some()
    }

    pub fn peek_head(&self) -> Option<Task> {
        self.slots[0]
    }

    pub fn contains(&self, task: Task) -> bool {
        self.iter().any(|queued| queued == task)
    }

    pub fn iter(&self) -> impl Iterator<Item = Task> + '_ {
        self.slots.iter().map_while(|slot| *slot)
    }

    pub fn enqueue_tail(&mut self, task: Task) -> Result<(), QueueError> {
        let len = self.len();
        if len == TASK_QUEUE_CAPACITY {
            return Err(QueueError::Full(task));
        }
        self.slots[len] = Some(task);
        Ok(())
    }

    /// Urgent insertion. The task always becomes the new head; on a full
    /// queue the tail entry is pushed out and reported.
    pub fn enqueue_head(&mut self, task: Task) -> Result<(), QueueError> {
        let dropped = self.slots[TASK_QUEUE_CAPACITY - 1];
        self.slots.copy_within(0..TASK_QUEUE_CAPACITY - 1, 1);
        self.slots[0] = Some(task);
        match dropped {
            Some(lost) => Err(QueueError::TailDropped(lost)),
            None => Ok(()),
        }
    }

    pub fn remove_head(&mut self) -> Option<Task> {
        let head = self.slots[0]?;
        self.slots.copy_within(1.., 0);
        self.slots[TASK_QUEUE_CAPACITY - 1] = None;
        Some(head)
    }

    /// Remove the first contiguous run of `task`, returning how many went
    pub fn remove_all(&mut self, task: Task) -> usize {
        let len = self.len();
        let Some(start) = self.slots[..len].iter().position(|slot| *slot == Some(task)) else {
            return 0;
        };
        let run = self.slots[start..len]
            .iter()
            .take_while(|slot| **slot == Some(task))
            .count();

        self.slots.copy_within(start + run.., start);
        for slot in &mut self.slots[TASK_QUEUE_CAPACITY - run..] {
            *slot = None;
        }
        run
    }

    pub fn clear(&mut self) {
        self.slots = [None; TASK_QUEUE_CAPACITY];
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The last completed tasks, oldest first; diagnostics only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHistory {
    entries: [Option<Task>; TASK_HISTORY_CAPACITY],
}

impl TaskHistory {
    pub const fn new() -> Self {
        Self {
            entries: [None; TASK_HISTORY_CAPACITY],
        }
    }

    pub fn record(&mut self, task: Task) {
        let len = self.entries.iter().take_while(|entry| entry.is_some()).count();
        if len == TASK_HISTORY_CAPACITY {
            self.entries.copy_within(1.., 0);
            self.entries[TASK_HISTORY_CAPACITY - 1] = Some(task);
        } else {
            self.entries[len] = Some(task);
        }
    }

    pub fn most_recent(&self) -> Option<Task> {
        self.entries.iter().rev().find_map(|entry| *entry)
    }

    pub fn iter(&self) -> impl Iterator<Item = Task> + '_ {
        self.entries.iter().map_while(|entry| *entry)
    }
}

impl Default for TaskHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Tasks whose command went out and whose response is still unclassified.
///
/// Kept in insertion order. The scheduler replaces the whole set on every
/// transmit, so under normal operation it holds zero or one task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentTasks {
    tasks: Vec<Task>,
}

impl SentTasks {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn insert(&mut self, task: Task) {
        if !self.tasks.contains(&task) {
            self.tasks.push(task);
        }
    }

    pub fn remove(&mut self, task: Task) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|sent| *sent != task);
        before != self.tasks.len()
    }

    pub fn contains(&self, task: Task) -> bool {
        self.tasks.contains(&task)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(queue: &mut TaskQueue) -> Vec<Task> {
        core::iter::from_fn(|| queue.remove_head()).collect()
    }

    #[test]
    fn test_enqueue_tail_is_fifo() {
        let mut queue = TaskQueue::new();
        let order = [
            Task::DisableEcho,
            Task::QueryWifiMode,
            Task::QueryOwnIp,
            Task::QueryStatusAndConnect,
            Task::ScanNetworks,
            Task::EstablishLongPoll,
        ];
        for task in order {
            queue.enqueue_tail(task).unwrap();
        }
        assert_eq!(queue.len(), order.len());
        assert_eq!(drain(&mut queue), order.to_vec());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_tail_rejects_overflow() {
        let mut queue = TaskQueue::new();
        for _ in 0..TASK_QUEUE_CAPACITY {
            queue.enqueue_tail(Task::ScanNetworks).unwrap();
        }
        assert_eq!(
            queue.enqueue_tail(Task::DisableEcho),
            Err(QueueError::Full(Task::DisableEcho))
        );
        assert_eq!(queue.len(), TASK_QUEUE_CAPACITY);
    }

    #[test]
    fn test_enqueue_head_becomes_next_peek() {
        let mut queue = TaskQueue::new();
        queue.enqueue_head(Task::SetStationMode).unwrap();
        assert_eq!(queue.peek_head(), Some(Task::SetStationMode));

        queue.enqueue_tail(Task::QueryOwnIp).unwrap();
        queue.enqueue_head(Task::ConnectToNetwork).unwrap();
        assert_eq!(
            queue.iter().collect::<Vec<_>>(),
            vec![Task::ConnectToNetwork, Task::SetStationMode, Task::QueryOwnIp]
        );
    }

    #[test]
    fn test_enqueue_head_on_full_queue_reports_dropped_tail() {
        let mut queue = TaskQueue::new();
        for _ in 0..TASK_QUEUE_CAPACITY - 1 {
            queue.enqueue_tail(Task::ScanNetworks).unwrap();
        }
        queue.enqueue_tail(Task::AwaitLongPoll).unwrap();

        assert_eq!(
            queue.enqueue_head(Task::SetOwnIp),
            Err(QueueError::TailDropped(Task::AwaitLongPoll))
        );
        assert_eq!(queue.peek_head(), Some(Task::SetOwnIp));
        assert_eq!(queue.len(), TASK_QUEUE_CAPACITY);
    }

    #[test]
    fn test_remove_head_on_empty_queue() {
        let mut queue = TaskQueue::new();
        assert_eq!(queue.remove_head(), None);
    }

    #[test]
    fn test_remove_all_removes_first_contiguous_run() {
        let mut queue = TaskQueue::new();
        for task in [
            Task::ConnectToServer,
            Task::AnnouncePayloadLength,
            Task::AnnouncePayloadLength,
            Task::AwaitLongPoll,
            Task::AnnouncePayloadLength,
        ] {
            queue.enqueue_tail(task).unwrap();
        }

        assert_eq!(queue.remove_all(Task::AnnouncePayloadLength), 2);
        assert_eq!(
            queue.iter().collect::<Vec<_>>(),
            vec![Task::ConnectToServer, Task::AwaitLongPoll, Task::AnnouncePayloadLength]
        );
        assert_eq!(queue.remove_all(Task::DisableEcho), 0);
    }

    #[test]
    fn test_remove_all_at_full_capacity() {
        let mut queue = TaskQueue::new();
        for _ in 0..TASK_QUEUE_CAPACITY - 1 {
            queue.enqueue_tail(Task::ScanNetworks).unwrap();
        }
        queue.enqueue_tail(Task::CloseConnection).unwrap();

        assert_eq!(queue.remove_all(Task::CloseConnection), 1);
        assert_eq!(queue.len(), TASK_QUEUE_CAPACITY - 1);
    }

    #[test]
    fn test_near_full_detection() {
        let mut queue = TaskQueue::new();
        for _ in 0..TASK_QUEUE_CAPACITY - 2 {
            queue.enqueue_tail(Task::ScanNetworks).unwrap();
        }
        assert!(!queue.is_near_full());
        queue.enqueue_tail(Task::ScanNetworks).unwrap();
        assert!(queue.is_near_full());
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = TaskHistory::new();
        assert_eq!(history.most_recent(), None);

        for _ in 0..TASK_HISTORY_CAPACITY {
            history.record(Task::ScanNetworks);
        }
        history.record(Task::DisableEcho);

        assert_eq!(history.most_recent(), Some(Task::DisableEcho));
        assert_eq!(history.iter().count(), TASK_HISTORY_CAPACITY);
        assert_eq!(
            history.iter().filter(|task| *task == Task::ScanNetworks).count(),
            TASK_HISTORY_CAPACITY - 1
        );
    }

    #[test]
    fn test_sent_tasks_set_semantics() {
        let mut sent = SentTasks::new();
        sent.insert(Task::DisableEcho);
        sent.insert(Task::DisableEcho);
        assert_eq!(sent.len(), 1);
        assert!(sent.contains(Task::DisableEcho));
        assert!(sent.remove(Task::DisableEcho));
        assert!(!sent.remove(Task::DisableEcho));
        assert!(sent.is_empty());
    }

    #[test]
    fn test_task_ids_are_distinct() {
        let ids: Vec<u32> = (1..=16u32).collect();
        let tasks = [
            Task::ScanNetworks,
            Task::DisableEcho,
            Task::ConnectToNetwork,
            Task::QueryStatusAndConnect,
            Task::QueryOwnIp,
            Task::SetOwnIp,
            Task::ConnectToServer,
            Task::AnnouncePayloadLength,
            Task::SendPayloadAwaitResponse,
            Task::QueryWifiMode,
            Task::SetStationMode,
            Task::CloseConnection,
            Task::QueryConnectionStatus,
            Task::ProbeServerAvailability,
            Task::EstablishLongPoll,
            Task::AwaitLongPoll,
        ];
        assert_eq!(tasks.iter().map(|task| task.id()).collect::<Vec<_>>(), ids);
    }
}
