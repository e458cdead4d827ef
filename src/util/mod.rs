use crate::models::EntityId;

#[cfg(target_arch = "wasm32")]
pub(crate) fn now_ms() -> i64 {
    js_sys::Date::now().round() as i64
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

pub(crate) fn make_tmp_id(now_ms: i64, rand: u64) -> String {
    format!("tmp-{now_ms}-{rand}")
}

fn random_u64() -> u64 {
    let mut buf = [0u8; 8];
    // Falls back to zero; the timestamp and the caller's sequence keep ids distinct.
    let _ = getrandom::getrandom(&mut buf);
    u64::from_le_bytes(buf)
}

/// Client-generated placeholder id for a link that has not been created yet.
pub(crate) fn new_temp_id(seq: u64) -> EntityId {
    EntityId::Temp(make_tmp_id(now_ms(), random_u64() ^ seq))
}
