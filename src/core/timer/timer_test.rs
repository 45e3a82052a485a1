//! Unit tests for the election timer task

use tokio::time::advance;
use tokio::time::Duration;
use tokio::time::Instant;

use super::*;

#[tokio::test(start_paused = true)]
async fn test_timer_task_deadline_is_delay_from_now() {
    let now = Instant::now();
    let task = TimerTask::new("acquire leader lock", Duration::from_millis(200), false, TimerAction::AcquireLeaderLock);

    assert_eq!(task.next_deadline(), now + Duration::from_millis(200));
    assert_eq!(task.remaining(), Duration::from_millis(200));
    assert!(!task.is_expired());
}

#[tokio::test(start_paused = true)]
async fn test_timer_task_expires_after_delay() {
    let task = TimerTask::new("heartbeat", Duration::from_millis(50), true, TimerAction::NotifyHeartbeat);

    advance(Duration::from_millis(49)).await;
    assert!(!task.is_expired());
    assert_eq!(task.remaining(), Duration::from_millis(1));

    advance(Duration::from_millis(1)).await;
    assert!(task.is_expired());
    assert_eq!(task.remaining(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_zero_delay_is_immediately_expired() {
    let task = TimerTask::new("break leader", Duration::ZERO, false, TimerAction::BreakLeaderLock);
    assert!(task.is_expired());
    assert!(!task.leader);
    assert_eq!(task.action, TimerAction::BreakLeaderLock);
}
