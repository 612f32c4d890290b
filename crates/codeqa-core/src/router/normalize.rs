//! Case-convention-insensitive name normalization
//!
//! `UserService`, `user_service`, `userService` and `user service` all
//! normalize to `user service`, so entity mentions can be matched on word
//! boundaries regardless of how the question spells them.

/// Split text into lowercase words on punctuation, whitespace and case
/// boundaries (`HTTPServer` becomes `http`, `server`).
pub fn split_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();

    for token in text.split(|c: char| !c.is_alphanumeric()) {
        if token.is_empty() {
            continue;
        }

        let chars: Vec<char> = token.chars().collect();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            if i > 0 && !current.is_empty() && c.is_uppercase() {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
                if prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next_is_lower)
                {
                    words.push(std::mem::take(&mut current).to_lowercase());
                }
            }
            current.push(c);
        }
        if !current.is_empty() {
            words.push(current.to_lowercase());
        }
    }

    words
}

/// Normalized form of a single identifier or dotted name
pub fn normalize_identifier(name: &str) -> String {
    split_words(name).join(" ")
}

/// Normalized form of a whole question
pub fn normalize_question(question: &str) -> String {
    split_words(question).join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_case_conventions_agree() {
        let expected = "user service";
        assert_eq!(normalize_identifier("UserService"), expected);
        assert_eq!(normalize_identifier("user_service"), expected);
        assert_eq!(normalize_identifier("userService"), expected);
        assert_eq!(normalize_identifier("USER_SERVICE"), expected);
    }

    #[test]
    fn test_acronyms_and_dots() {
        assert_eq!(normalize_identifier("HTTPServer"), "http server");
        assert_eq!(normalize_identifier("parseHTML"), "parse html");
        assert_eq!(normalize_identifier("UserService.get_user"), "user service get user");
        assert_eq!(normalize_identifier("v2Client"), "v2 client");
    }

    #[test]
    fn test_question_punctuation() {
        assert_eq!(
            normalize_question("What does `UserService.get_user()` do?"),
            "what does user service get user do"
        );
    }

    fn camel(words: &[String]) -> String {
        words
            .iter()
            .enumerate()
            .map(|(i, w)| {
                if i == 0 {
                    w.clone()
                } else {
                    let mut chars = w.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect(),
                        None => String::new(),
                    }
                }
            })
            .collect()
    }

    proptest! {
        #[test]
        fn prop_conventions_normalize_equal(words in prop::collection::vec("[a-z]{2,8}", 1..5)) {
            let expected = words.join(" ");
            prop_assert_eq!(normalize_identifier(&words.join("_")), expected.clone());
            prop_assert_eq!(normalize_identifier(&camel(&words)), expected.clone());
            prop_assert_eq!(normalize_identifier(&words.join("_").to_uppercase()), expected);
        }

        #[test]
        fn prop_normalization_idempotent(text in "[A-Za-z0-9_ .]{0,40}") {
            let once = normalize_question(&text);
            prop_assert_eq!(normalize_question(&once), once);
        }
    }
}
