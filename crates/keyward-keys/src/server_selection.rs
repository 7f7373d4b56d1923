use keyward_core::error::CoreError;
use keyward_core::model::Server;
use keyward_store::KeywardStore;

/// Servers paired with their current occupancy, sorted descending by free
/// capacity.
pub fn list_servers_sorted_by_free_slots(
    store: &KeywardStore,
    is_test: bool,
) -> Result<Vec<(Server, i32)>, CoreError> {
    let mut pairs: Vec<(Server, i32)> = Vec::new();
    for server in store.list_servers()? {
        if server.is_test != is_test {
            continue;
        }
        let used = store.count_active_keys_on_server(server.id)?;
        pairs.push((server, used));
    }
    pairs.sort_by_key(|(server, used)| -(server.max_users - used));
    Ok(pairs)
}

/// Pick the server with the most free slots. A server at or past capacity
/// is still returned (soft cap) — the caller is responsible for notifying
/// operators.
pub fn select_server(store: &KeywardStore, is_test: bool) -> Result<(Server, i32), CoreError> {
    list_servers_sorted_by_free_slots(store, is_test)?
        .into_iter()
        .next()
        .ok_or_else(|| CoreError::not_found("no server available for is_test selection"))
}
