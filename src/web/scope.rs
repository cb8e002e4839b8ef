use crate::modules::persistence::request_db::Scope;

/// Maps a presented credential to its record visibility. An empty credential
/// is unauthenticated and rejected before the store is ever reached; the
/// administrative credential sees everything; anything else sees only its
/// own records.
pub fn resolve_scope(apikey: &str, admin_api_key: &str) -> Option<Scope> {
    if apikey.is_empty() {
        return None;
    }
    if !admin_api_key.is_empty() && apikey == admin_api_key {
        return Some(Scope::Unrestricted);
    }
    Some(Scope::Credential(apikey.to_string()))
}
