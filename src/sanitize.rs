/// Turn a remote label into a filesystem-safe path segment.
///
/// Every character outside letters, digits, `_`, `-`, `.` and space becomes
/// `_`. Distinct labels may map to the same name; no disambiguation is done.
pub fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
