//! Identifier casing: route segments are camelCase, storage columns snake_case.

/// Convert a single identifier from snake_case to camelCase.
/// e.g. "user_id" -> "userId", "get_user_list" -> "getUserList"
pub fn to_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize_next = false;
    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert a single identifier from camelCase or PascalCase to snake_case.
/// e.g. "userId" -> "user_id", "UserInfo" -> "user_info"
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Route-segment casing: snake first so PascalCase names lose their leading
/// capital. "Demo" -> "demo", "UserAccount" -> "userAccount".
pub fn to_path_segment(s: &str) -> String {
    to_camel_case(&to_snake_case(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_to_camel() {
        assert_eq!(to_camel_case("user_id"), "userId");
        assert_eq!(to_camel_case("get_user_list"), "getUserList");
        assert_eq!(to_camel_case("plain"), "plain");
    }

    #[test]
    fn camel_to_snake() {
        assert_eq!(to_snake_case("userId"), "user_id");
        assert_eq!(to_snake_case("UserInfo"), "user_info");
        assert_eq!(to_snake_case("plain"), "plain");
    }

    #[test]
    fn path_segment_lowers_leading_capital() {
        assert_eq!(to_path_segment("Demo"), "demo");
        assert_eq!(to_path_segment("UserAccount"), "userAccount");
        assert_eq!(to_path_segment("getUser"), "getUser");
    }
}
