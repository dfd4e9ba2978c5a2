//! One student advertises, the instructor scans and reconciles.

use std::sync::Arc;
use std::time::Duration;

use rollcall_core::platform::mock::sighting_from;
use rollcall_core::{
    observed_identities, reconcile, AdvertiseOptions, AdvertisingController, BleConfig,
    CompletionListener, Identity, MockRadio, PermissionGate, ScanController, ScanEnd, ScanRequest,
    Verdict,
};

fn advertiser(radio: &MockRadio) -> AdvertisingController {
    AdvertisingController::new(
        Arc::new(radio.clone()),
        Arc::new(PermissionGate::default()),
        BleConfig::default(),
    )
}

fn scanner(radio: &MockRadio) -> ScanController {
    ScanController::new(
        Arc::new(radio.clone()),
        Arc::new(PermissionGate::default()),
        BleConfig::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_single_student_is_counted_once() {
    let student_radio = MockRadio::new();
    let instructor_radio = MockRadio::new();

    let student = advertiser(&student_radio);
    student
        .start_advertising(Identity::new(42), AdvertiseOptions::default())
        .await
        .unwrap();
    let broadcast = student_radio.current_broadcast().unwrap();

    let instructor = scanner(&instructor_radio);
    let (listener, mut found, done) = CompletionListener::with_devices();
    let request = ScanRequest {
        timeout: Some(Duration::from_secs(10)),
        ..ScanRequest::default()
    };
    instructor.start_scan(request, listener).await.unwrap();

    assert!(instructor_radio.inject(sighting_from("student-phone", &broadcast, Some(-62))));
    assert!(instructor_radio.inject(sighting_from("student-phone", &broadcast, Some(-58))));

    let first = found.recv().await.unwrap();
    assert_eq!(first.payload, Some(Identity::new(42)));

    let report = done.await.unwrap();
    assert_eq!(report.ended_by, ScanEnd::Timeout);
    assert_eq!(report.devices.len(), 1);
    assert!(found.try_recv().is_err());

    let result = reconcile(1, &observed_identities(&report)).unwrap();
    assert_eq!(result.verdict, Verdict::Normal);
    assert_eq!(result.delta, 0);
}

#[tokio::test(start_paused = true)]
async fn test_proxy_phone_flags_overcount() {
    let instructor_radio = MockRadio::new();
    let instructor = scanner(&instructor_radio);

    // One phone in the room, but it rotates through two identities.
    let proxy_radio = MockRadio::new();
    let proxy = advertiser(&proxy_radio);
    proxy
        .start_advertising(Identity::new(7), AdvertiseOptions::default())
        .await
        .unwrap();
    let first = proxy_radio.current_broadcast().unwrap();
    proxy
        .restart_advertising(Identity::new(8), AdvertiseOptions::default())
        .await
        .unwrap();
    let second = proxy_radio.current_broadcast().unwrap();

    let (listener, done) = CompletionListener::new();
    instructor
        .start_scan(ScanRequest::default(), listener)
        .await
        .unwrap();
    instructor_radio.inject(sighting_from("rpa-1", &first, Some(-50)));
    instructor_radio.inject(sighting_from("rpa-2", &second, Some(-50)));
    instructor.stop_scan().await;

    let report = done.await.unwrap();
    assert_eq!(report.ended_by, ScanEnd::Stopped);

    let result = reconcile(1, &observed_identities(&report)).unwrap();
    assert_eq!(result.verdict, Verdict::Overcount);
    assert_eq!(result.review_request().unwrap().delta, 1);
}
