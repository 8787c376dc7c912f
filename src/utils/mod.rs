pub mod time;

/// Generates a url-safe unique id for calls and subscriptions.
pub fn longid() -> String {
    nanoid::nanoid!()
}
