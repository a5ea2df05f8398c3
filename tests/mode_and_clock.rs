//! Mode auto-switching, manual overrides and the shared virtual clock.

mod common;

use common::{clock_at, ist, memory_stores, mode_controller};
use std::sync::Arc;
use tradecouncil::application::clock::SharedClock;
use tradecouncil::application::mode_controller::SwitchOutcome;
use tradecouncil::domain::calendar::MarketCalendar;
use tradecouncil::domain::mode::Mode;
use tradecouncil::domain::ports::KeyValueStore;
use tradecouncil::infrastructure::memory::InMemoryKeyValueStore;

#[tokio::test]
async fn virtual_time_is_shared_through_the_store() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
    let writer = SharedClock::with_store(kv.clone());
    let reader = SharedClock::with_store(kv);

    let at = ist(2025, 6, 2, 10, 0, 0);
    writer.set_virtual(at).await.unwrap();

    assert!(reader.is_virtual().await);
    assert_eq!(reader.now().await, at);

    writer
        .advance(chrono::Duration::minutes(15))
        .await
        .unwrap();
    assert_eq!(reader.now().await, at + chrono::Duration::minutes(15));

    writer.clear_virtual().await.unwrap();
    assert!(!reader.is_virtual().await);
}

#[tokio::test]
async fn auto_switch_follows_the_calendar() {
    // Monday 10:00 IST: market open.
    let clock = clock_at(ist(2025, 6, 2, 10, 0, 0)).await;
    let stores = memory_stores(Mode::SimClosed);
    let controller = mode_controller(
        clock.clone(),
        MarketCalendar::nse(),
        stores.stores.clone(),
        Mode::SimClosed,
    )
    .await;

    match controller.tick().await.unwrap() {
        SwitchOutcome::Switched { from, to, .. } => {
            assert_eq!(from, Mode::SimClosed);
            assert_eq!(to, Mode::SimOpen);
        }
        other => panic!("expected switch, got {:?}", other),
    }
    assert_eq!(controller.current_mode().await, Mode::SimOpen);
    assert_eq!(stores.stores.active_mode().await, Mode::SimOpen);

    // No change while the suggestion matches.
    assert_eq!(controller.tick().await.unwrap(), SwitchOutcome::NoChange);

    // Saturday: market closed, back to mock.
    clock.set_virtual(ist(2025, 6, 7, 12, 0, 0)).await.unwrap();
    match controller.tick().await.unwrap() {
        SwitchOutcome::Switched { to, .. } => assert_eq!(to, Mode::SimClosed),
        other => panic!("expected switch, got {:?}", other),
    }
}

#[tokio::test]
async fn manual_override_suspends_auto_switching() {
    let clock = clock_at(ist(2025, 6, 2, 10, 0, 0)).await;
    let stores = memory_stores(Mode::SimClosed);
    let controller = mode_controller(
        clock.clone(),
        MarketCalendar::nse(),
        stores.stores,
        Mode::SimClosed,
    )
    .await;

    controller
        .set_manual(Mode::SimClosed, false, None)
        .await
        .unwrap();
    assert_eq!(
        controller.tick().await.unwrap(),
        SwitchOutcome::OverrideActive
    );

    let info = controller.mode_info().await;
    assert!(info.has_manual_override);
    assert_eq!(info.current_mode, Mode::SimClosed);
    assert!(info.market_open);
    assert_eq!(info.suggested_mode, Mode::SimOpen);

    // Clearing the override resumes calendar-driven switching.
    controller.clear_manual().await.unwrap();
    assert!(matches!(
        controller.tick().await.unwrap(),
        SwitchOutcome::Switched { .. }
    ));
}

#[tokio::test]
async fn live_mode_requires_confirmation() {
    let clock = clock_at(ist(2025, 6, 2, 10, 0, 0)).await;
    let stores = memory_stores(Mode::SimOpen);
    let controller = mode_controller(
        clock,
        MarketCalendar::nse(),
        stores.stores,
        Mode::SimOpen,
    )
    .await;

    assert_eq!(
        controller.set_manual(Mode::Live, false, None).await.unwrap(),
        SwitchOutcome::ConfirmationRequired
    );
    assert_eq!(controller.current_mode().await, Mode::SimOpen);

    assert!(matches!(
        controller.set_manual(Mode::Live, true, None).await.unwrap(),
        SwitchOutcome::Switched { to: Mode::Live, .. }
    ));
    assert_eq!(controller.current_mode().await, Mode::Live);
    assert_eq!(controller.mode_info().await.manual_override, Some(Mode::Live));
}
