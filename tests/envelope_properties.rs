//! Seed to envelope and back, over arbitrary content and identities.

use chrono::{DateTime, Utc};
use proptest::prelude::*;

use cloud_vault::crypto::{decrypt, derive_key, encrypt, Envelope};
use cloud_vault::{Identity, SeedClock, VaultError, VaultKey};

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn session_key(id: &str, salt: &str) -> VaultKey {
    let identity = Identity::new(id).with_session_salt(salt);
    let seed = SeedClock::session().seed(&identity, now()).unwrap();
    derive_key(seed.as_str()).unwrap()
}

/// Encrypt, then push the envelope through its stored base64 form
fn seal(content: &[u8], key: &VaultKey) -> Envelope {
    let stored = encrypt(content, key).unwrap().encode();
    let json = serde_json::to_string(&stored).unwrap();
    serde_json::from_str::<cloud_vault::EncodedEnvelope>(&json)
        .unwrap()
        .decode()
        .unwrap()
}

proptest! {
    // Every case pays for a full PBKDF2 run
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn stored_envelope_always_opens(
        content in proptest::collection::vec(any::<u8>(), 1..512),
        id in "[a-z0-9]{1,12}",
        salt in "[A-Za-z0-9]{1,16}",
    ) {
        let key = session_key(&id, &salt);
        let envelope = seal(&content, &key);
        prop_assert_eq!(envelope.ciphertext.len(), content.len() + 16);

        let opened = decrypt(&envelope, &session_key(&id, &salt), "application/octet-stream")
            .unwrap();
        prop_assert_eq!(opened.data(), &content[..]);
    }

    #[test]
    fn another_salt_never_opens(
        content in proptest::collection::vec(any::<u8>(), 1..256),
        id in "[a-z0-9]{1,12}",
        salt_a in "[A-Za-z0-9]{1,16}",
        salt_b in "[A-Za-z0-9]{1,16}",
    ) {
        prop_assume!(salt_a != salt_b);
        let envelope = seal(&content, &session_key(&id, &salt_a));

        let result = decrypt(&envelope, &session_key(&id, &salt_b), "application/octet-stream");
        prop_assert!(matches!(result, Err(VaultError::AuthenticationFailure)));
    }
}
