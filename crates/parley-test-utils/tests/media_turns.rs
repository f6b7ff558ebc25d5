// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Receipts sent as encrypted media during a payment flow.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parley_core::{
    DedupeKey, FlowKind, Identity, InboundMessage, MediaCategory, MediaRef, ParleyError,
    SessionData,
};
use parley_dispatch::{FlowHandler, TurnContext};
use parley_media::MediaKeys;
use parley_media::cipher::encrypt;
use parley_test_utils::{KeywordSelector, TestHarness};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ANA: &str = "+5215512345678";
const RECEIPT: &[u8] = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n%%EOF\n";
const MEDIA_KEY: [u8; 32] = [7u8; 32];

/// Stores the receipt URL, or asks again when the attachment cannot be opened.
struct ReceiptFlow;

#[async_trait]
impl FlowHandler for ReceiptFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::Payment
    }

    async fn handle(&self, ctx: &mut TurnContext<'_>) -> Result<(), ParleyError> {
        if ctx.inbound().media.is_empty() {
            return ctx.send("Envía tu comprobante").await;
        }
        match ctx.resolve_media(0, "comprobante").await {
            Ok(resolved) => {
                let data = SessionData::new()
                    .with("comprobante_url", resolved.public_url.as_str())
                    .with("comprobante_tipo", resolved.content_type.as_str());
                ctx.update_session(3, Some(&data)).await?;
                ctx.send("Comprobante recibido").await
            }
            Err(ParleyError::DecryptionFailed(_)) => {
                ctx.send("No pude abrir el archivo, reenvíalo por favor").await
            }
            Err(e) => Err(e),
        }
    }
}

async fn harness() -> TestHarness {
    TestHarness::builder()
        .with_selector(Arc::new(
            KeywordSelector::new("Escribe PAGO").route("pago", FlowKind::Payment),
        ))
        .with_flow(Arc::new(ReceiptFlow))
        .with_media()
        .build()
        .await
        .unwrap()
}

async fn serve_receipt(key: &[u8]) -> MockServer {
    let server = MockServer::start().await;
    let keys = MediaKeys::derive(key, MediaCategory::Document).unwrap();
    Mock::given(method("GET"))
        .and(path("/v/t62/receipt.enc"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(encrypt(RECEIPT, &keys).unwrap()))
        .mount(&server)
        .await;
    server
}

fn document(server: &MockServer, id: &str) -> InboundMessage {
    InboundMessage::new(DedupeKey::from_provider_id(id), Identity::new(ANA), "").with_media(
        MediaRef {
            url: format!("{}/v/t62/receipt.enc", server.uri()),
            crypto_key: Some(STANDARD.encode(MEDIA_KEY)),
            mimetype: Some("application/pdf".into()),
            file_name: Some("recibo.pdf".into()),
            category: MediaCategory::Document,
        },
    )
}

#[tokio::test]
async fn receipt_is_decrypted_and_republished() {
    let harness = harness().await;
    let server = serve_receipt(&MEDIA_KEY).await;

    harness
        .dispatch_and_wait(&TestHarness::inbound(ANA, "p1", "pago"))
        .await
        .unwrap();
    harness
        .dispatch_and_wait(&document(&server, "p2"))
        .await
        .unwrap();

    let keys = harness.store.keys().await;
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("test/"));
    assert!(keys[0].ends_with(".pdf"));

    let stored = harness.store.get(&keys[0]).await.unwrap();
    assert_eq!(stored.body, RECEIPT);
    assert_eq!(stored.content_type, "application/pdf");

    let session = harness.open_session(ANA).await.unwrap().unwrap();
    assert_eq!(session.step, 3);
    assert_eq!(
        session.data.get_str("comprobante_url"),
        Some(format!("https://media.test/{}", keys[0]).as_str())
    );
    assert_eq!(
        harness.sender.texts_to(&Identity::new(ANA)).await,
        vec!["Envía tu comprobante", "Comprobante recibido"]
    );
}

#[tokio::test]
async fn unreadable_receipt_is_requested_again() {
    let harness = harness().await;
    // Encrypted under a different key than the one in the message.
    let server = serve_receipt(&[9u8; 32]).await;

    harness
        .dispatch_and_wait(&TestHarness::inbound(ANA, "q1", "pago"))
        .await
        .unwrap();
    harness
        .dispatch_and_wait(&document(&server, "q2"))
        .await
        .unwrap();

    assert!(harness.store.keys().await.is_empty());
    let session = harness.open_session(ANA).await.unwrap().unwrap();
    assert_eq!(session.step, 1);
    assert!(!session.data.contains_key("comprobante_url"));
    let texts = harness.sender.texts_to(&Identity::new(ANA)).await;
    assert_eq!(texts.last().map(String::as_str), Some("No pude abrir el archivo, reenvíalo por favor"));
}
