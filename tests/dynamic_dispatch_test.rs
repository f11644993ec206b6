use eventbook::domain::changeset::Changeset;
use eventbook::domain::gateway::CheckoutRequest;
use eventbook::domain::ids::VenueId;
use eventbook::domain::ports::{GatewayRef, StoreRef};
use eventbook::domain::venue::Venue;
use eventbook::error::{BookingError, GatewayError};
use eventbook::infrastructure::gateway::MockPaymentGateway;
use eventbook::infrastructure::in_memory::InMemoryStore;
use std::collections::BTreeMap;
use std::sync::Arc;

#[tokio::test]
async fn test_ports_as_trait_objects() {
    let store: StoreRef = Arc::new(InMemoryStore::new());
    let gateway: GatewayRef = Arc::new(MockPaymentGateway::new());

    // Verify Send + Sync by spawning tasks
    let store_handle = tokio::spawn(async move {
        let id = VenueId(store.next_id().await.unwrap());
        store
            .commit(Changeset {
                venues: vec![Venue {
                    id,
                    name: "Cafe Babel".to_string(),
                    capacity: 12,
                    active: true,
                }],
                ..Changeset::default()
            })
            .await
            .unwrap();
        store.venue(id).await.unwrap().unwrap()
    });

    let gateway_handle = tokio::spawn(async move {
        gateway
            .create_checkout_session(CheckoutRequest {
                amount: 1500,
                currency: "eur".to_string(),
                description: "seat".to_string(),
                success_url: "https://app.test/success".to_string(),
                cancel_url: "https://app.test/cancel".to_string(),
                metadata: BTreeMap::new(),
            })
            .await
            .unwrap()
    });

    let venue = store_handle.await.unwrap();
    assert_eq!(venue.capacity, 12);

    let session = gateway_handle.await.unwrap();
    assert!(session.payment_intent.is_some());
}

#[tokio::test]
async fn test_gateway_errors_convert_into_booking_errors() {
    let gateway = MockPaymentGateway::new();
    gateway.fail_refunds(true);
    let gateway: GatewayRef = Arc::new(gateway);

    let err: BookingError = gateway
        .create_refund("pi_1", 1500, "eur")
        .await
        .unwrap_err()
        .into();
    assert!(matches!(
        err,
        BookingError::GatewayError(GatewayError::Rejected(_))
    ));
}
