//! End-to-end exercises of the key-agreement and mutual-authentication
//! flows, driven the way a transport layer drives them: every payload one
//! side builds is handed verbatim to the other side's `process_*` call.

use std::sync::Arc;

use rand::thread_rng;
use secp256k1::PublicKey;
use tradelink_crypto::CryptoContext;
use tradelink_primitives::wire::REKEY_SENTINEL;
use tradelink_primitives::CipherSuite;
use tradelink_transport::{
    AuthStage, Direction, EncryptedConnection, FramedMessage, HandshakePolicy, InMemoryPeerKeys,
    ProtocolError,
};

const SIGNER_NAME: &str = "signer:23456";
const TERMINAL_NAME: &str = "terminal";

struct Link {
    requester: EncryptedConnection,
    responder: EncryptedConnection,
    requester_identity: PublicKey,
    responder_identity: PublicKey,
}

/// Builds a terminal↔signer pair. The requester always knows the
/// responder's identity key; whether the responder knows the requester's
/// is the interesting variable.
fn link(register_requester: bool, allow_anonymous: bool) -> Link {
    let ctx = Arc::new(CryptoContext::new());
    let (requester_sk, requester_pk) = ctx.generate_keypair(&mut thread_rng());
    let (responder_sk, responder_pk) = ctx.generate_keypair(&mut thread_rng());

    let mut requester_store = InMemoryPeerKeys::new(requester_sk, requester_pk);
    requester_store.add_peer(SIGNER_NAME, responder_pk);

    let mut responder_store = InMemoryPeerKeys::new(responder_sk, responder_pk);
    if register_requester {
        responder_store.add_peer(TERMINAL_NAME, requester_pk);
    }

    let policy = HandshakePolicy {
        allow_anonymous_requester: allow_anonymous,
        ..HandshakePolicy::default()
    };

    Link {
        requester: EncryptedConnection::new(Arc::clone(&ctx), Arc::new(requester_store), policy),
        responder: EncryptedConnection::new(ctx, Arc::new(responder_store), policy),
        requester_identity: requester_pk,
        responder_identity: responder_pk,
    }
}

/// encinit/encack in both directions.
fn establish_sessions(link: &mut Link) -> eyre::Result<()> {
    let encinit = link.requester.encinit_data(CipherSuite::ChaCha20Poly1305)?;
    link.responder.process_encinit(&encinit, Direction::Inbound)?;
    let encack = link.responder.encack_data()?;
    link.requester.process_encack(&encack, Direction::Outbound)?;

    let encinit = link.responder.encinit_data(CipherSuite::ChaCha20Poly1305)?;
    link.requester.process_encinit(&encinit, Direction::Inbound)?;
    let encack = link.requester.encack_data()?;
    link.responder.process_encack(&encack, Direction::Outbound)?;

    eyre::ensure!(link.requester.connection_complete());
    eyre::ensure!(link.responder.connection_complete());
    Ok(())
}

/// The six authentication steps, without the final identity rekey.
fn run_auth_steps(link: &mut Link) -> eyre::Result<()> {
    let (challenge1, _) = link.requester.auth_challenge_data(SIGNER_NAME, true, false)?;
    let c1 = link.responder.process_auth_challenge(&challenge1, true)?;

    let (reply1, _) = link.responder.auth_reply_data(true, c1.is_passed())?;
    let r1 = link.requester.process_auth_reply(&reply1, true, false)?;
    eyre::ensure!(r1.is_passed(), "responder signature must verify");

    let propose = link.requester.auth_propose_data()?;
    let p = link.responder.process_auth_propose(&propose)?;
    if p.is_passed() {
        link.responder.set_good_propose();
    }

    let (challenge2, _) = link.responder.auth_challenge_data("", false, p.is_passed())?;
    let c2 = link.requester.process_auth_challenge(&challenge2, false)?;

    let (reply2, _) = link.requester.auth_reply_data(false, c2.is_passed())?;
    let good = link.responder.good_propose();
    let r2 = link.responder.process_auth_reply(&reply2, false, good)?;
    eyre::ensure!(r2.is_passed(), "final reply must be accepted");
    Ok(())
}

fn authenticate(link: &mut Link) -> eyre::Result<()> {
    run_auth_steps(link)?;
    link.requester.finalize_authentication()?;
    link.responder.finalize_authentication()?;
    Ok(())
}

fn round_trip(from: &mut EncryptedConnection, to: &mut EncryptedConnection, payload: &[u8]) -> eyre::Result<Vec<u8>> {
    let frame = FramedMessage::new(&b"msg"[..], payload).to_bytes();
    let packet = from.assemble_packet(&frame)?;
    let opened = to.decrypt_packet(&packet)?;
    let parsed = FramedMessage::from_bytes(&opened)?;
    Ok(parsed.payload().to_vec())
}

#[test]
fn key_agreement_carries_traffic_both_ways() -> eyre::Result<()> {
    let mut link = link(true, false);
    establish_sessions(&mut link)?;

    assert_eq!(round_trip(&mut link.requester, &mut link.responder, b"hello")?, b"hello");
    assert_eq!(round_trip(&mut link.responder, &mut link.requester, b"ack")?, b"ack");
    Ok(())
}

#[test]
fn tampered_packets_are_rejected() -> eyre::Result<()> {
    let mut link = link(true, false);
    establish_sessions(&mut link)?;

    let frame = FramedMessage::new(&b"msg"[..], &b"hello"[..]).to_bytes();
    let mut packet = link.requester.assemble_packet(&frame)?;
    let last = packet.len() - 1;
    packet[last] ^= 0x40;
    assert!(link.responder.decrypt_packet(&packet).is_err());
    Ok(())
}

#[test]
fn mutual_authentication_rebinds_the_channel() -> eyre::Result<()> {
    let mut link = link(true, false);
    establish_sessions(&mut link)?;

    assert_eq!(round_trip(&mut link.requester, &mut link.responder, b"hello")?, b"hello");

    authenticate(&mut link)?;
    assert_eq!(link.requester.auth_stage(), AuthStage::Success);
    assert_eq!(link.responder.auth_stage(), AuthStage::Success);
    assert_eq!(link.requester.peer_identity(), Some(link.responder_identity));
    assert_eq!(link.responder.peer_identity(), Some(link.requester_identity));

    // Traffic continues seamlessly under the identity-bound keys.
    assert_eq!(round_trip(&mut link.requester, &mut link.responder, b"world")?, b"world");
    assert_eq!(round_trip(&mut link.responder, &mut link.requester, b"signed")?, b"signed");
    Ok(())
}

#[test]
fn pre_authentication_keys_die_with_the_identity_rekey() -> eyre::Result<()> {
    let mut link = link(true, false);
    establish_sessions(&mut link)?;
    run_auth_steps(&mut link)?;

    // Sealed under the key-agreement keys, delivered only after both
    // sides rebound their channels.
    let stale_frame = FramedMessage::new(&b"msg"[..], &b"stale"[..]).to_bytes();
    let stale = link.requester.assemble_packet(&stale_frame)?;

    link.requester.finalize_authentication()?;
    link.responder.finalize_authentication()?;

    assert!(link.responder.decrypt_packet(&stale).is_err());

    // The opposite direction starts clean under the new keys.
    assert_eq!(round_trip(&mut link.responder, &mut link.requester, b"fresh")?, b"fresh");
    Ok(())
}

#[test]
fn unknown_requester_is_fatal_under_strict_policy() -> eyre::Result<()> {
    let mut link = link(false, false);
    establish_sessions(&mut link)?;

    let (challenge1, _) = link.requester.auth_challenge_data(SIGNER_NAME, true, false)?;
    let c1 = link.responder.process_auth_challenge(&challenge1, true)?;
    let (reply1, _) = link.responder.auth_reply_data(true, c1.is_passed())?;
    let r1 = link.requester.process_auth_reply(&reply1, true, false)?;
    assert!(r1.is_passed());

    let propose = link.requester.auth_propose_data()?;
    let denied = link.responder.process_auth_propose(&propose);
    assert!(matches!(denied, Err(ProtocolError::UnknownPeer(_))));
    assert_eq!(link.responder.auth_stage(), AuthStage::Failed);

    // The failed machine refuses to produce the next challenge.
    assert!(link.responder.auth_challenge_data("", false, false).is_err());
    assert_ne!(link.requester.auth_stage(), AuthStage::Success);
    Ok(())
}

#[test]
fn anonymous_requester_succeeds_when_policy_permits() -> eyre::Result<()> {
    let mut link = link(false, true);
    establish_sessions(&mut link)?;
    authenticate(&mut link)?;

    assert_eq!(link.requester.auth_stage(), AuthStage::Success);
    assert_eq!(link.responder.auth_stage(), AuthStage::Success);
    // The responder learned the requester's key from the anonymous reply.
    assert_eq!(link.responder.peer_identity(), Some(link.requester_identity));

    assert_eq!(round_trip(&mut link.requester, &mut link.responder, b"anon")?, b"anon");
    assert_eq!(round_trip(&mut link.responder, &mut link.requester, b"ok")?, b"ok");
    Ok(())
}

#[test]
fn out_of_order_propose_fails_the_machine() -> eyre::Result<()> {
    let mut link = link(true, false);
    establish_sessions(&mut link)?;

    let result = link.responder.process_auth_propose(&[0_u8; 32]);
    assert!(matches!(
        result,
        Err(ProtocolError::SequenceViolation { .. })
    ));
    assert_eq!(link.responder.auth_stage(), AuthStage::Failed);
    Ok(())
}

#[test]
fn unknown_responder_name_is_an_unknown_peer() -> eyre::Result<()> {
    let mut link = link(true, false);
    establish_sessions(&mut link)?;

    let result = link.requester.auth_challenge_data("nobody:1", true, false);
    assert!(matches!(result, Err(ProtocolError::UnknownPeer(_))));
    Ok(())
}

#[test]
fn in_band_rekey_round_trips() -> eyre::Result<()> {
    let mut link = link(true, false);
    establish_sessions(&mut link)?;

    assert_eq!(round_trip(&mut link.requester, &mut link.responder, b"hello")?, b"hello");

    let rekey_packet = link.requester.request_rekey()?;
    let opened = link.responder.decrypt_packet(&rekey_packet)?;
    let frame = FramedMessage::from_bytes(&opened)?;
    assert_eq!(frame.command(), &b"encack"[..]);
    assert_eq!(frame.payload(), &REKEY_SENTINEL[..]);
    link.responder
        .process_encack(frame.payload(), Direction::Inbound)?;

    // Both sides ratcheted; traffic flows under the new key set.
    assert_eq!(round_trip(&mut link.requester, &mut link.responder, b"after")?, b"after");
    Ok(())
}

#[test]
fn auth_before_key_agreement_is_refused() {
    let mut link = link(true, false);
    let result = link.requester.auth_challenge_data(SIGNER_NAME, true, false);
    assert!(matches!(
        result,
        Err(ProtocolError::SequenceViolation { .. })
    ));
}
