use super::{Message, Version};

/// Fold one streamed fragment into the message list and return the new list.
///
/// The list is taken by value; whatever comes back is the only valid copy.
/// Several agents can stream into the same assistant message: the primary
/// `text` only grows for the message's own agent, while every agent gets a
/// `Version` of its own, ordered by first appearance.
pub fn apply_chunk(mut messages: Vec<Message>, chunk: &str, agent_slug: &str) -> Vec<Message> {
    match messages.last_mut() {
        Some(last) if last.is_assistant() => {
            if last.is_unclaimed_placeholder() {
                last.agent_slug = Some(agent_slug.to_string());
            }
            if last.agent_slug.as_deref() == Some(agent_slug) {
                last.text.push_str(chunk);
            }
            match last.versions.iter_mut().find(|v| v.agent_slug == agent_slug) {
                Some(version) => version.text.push_str(chunk),
                None => last.versions.push(Version::new(agent_slug, chunk)),
            }
        }
        _ => messages.push(Message::streamed(agent_slug, chunk)),
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;

    fn stream(messages: Vec<Message>, chunks: &[(&str, &str)]) -> Vec<Message> {
        chunks
            .iter()
            .fold(messages, |acc, (slug, chunk)| apply_chunk(acc, chunk, slug))
    }

    #[test]
    fn test_chunks_on_empty_list() {
        let out = stream(Vec::new(), &[("a1", "Hel"), ("a1", "lo")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, Role::Assistant);
        assert_eq!(out[0].text, "Hello");
        assert_eq!(out[0].agent_slug.as_deref(), Some("a1"));
        assert_eq!(out[0].versions, vec![Version::new("a1", "Hello")]);
    }

    #[test]
    fn test_second_agent_adds_version_only() {
        let out = stream(Vec::new(), &[("a1", "one"), ("a2", "two"), ("a1", "!")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "one!");
        assert_eq!(out[0].versions.len(), 2);
        assert_eq!(out[0].versions[0].agent_slug, "a1");
        assert_eq!(out[0].versions[0].text, "one!");
        assert_eq!(out[0].versions[1].agent_slug, "a2");
        assert_eq!(out[0].versions[1].text, "two");
    }

    #[test]
    fn test_one_version_per_agent_in_arrival_order() {
        let chunks = [
            ("b", "1"),
            ("a", "x"),
            ("c", "q"),
            ("a", "y"),
            ("b", "2"),
            ("c", "r"),
            ("b", "3"),
        ];
        let out = stream(Vec::new(), &chunks);
        let slugs: Vec<&str> = out[0].versions.iter().map(|v| v.agent_slug.as_str()).collect();
        assert_eq!(slugs, ["b", "a", "c"]);
        assert_eq!(out[0].version("a").unwrap().text, "xy");
        assert_eq!(out[0].version("b").unwrap().text, "123");
        assert_eq!(out[0].version("c").unwrap().text, "qr");
        assert_eq!(out[0].text, "123");
    }

    #[test]
    fn test_new_turn_after_user_message() {
        let history = stream(Vec::new(), &[("a1", "earlier")]);
        let mut messages = history;
        messages.push(Message::user("next question"));
        let out = apply_chunk(messages, "fresh", "a1");
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].text, "fresh");
        assert_eq!(out[0].text, "earlier");
    }

    #[test]
    fn test_placeholder_is_claimed_by_first_agent() {
        let messages = vec![Message::user("hi"), Message::assistant_placeholder()];
        let out = stream(messages, &[("a1", "Hi"), ("a2", "Yo"), ("a1", " there")]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].agent_slug.as_deref(), Some("a1"));
        assert_eq!(out[1].text, "Hi there");
        assert_eq!(out[1].versions.len(), 2);
    }

    #[test]
    fn test_finalized_assistant_keeps_its_identity() {
        let mut messages = stream(Vec::new(), &[("a1", "done")]);
        messages[0].id = Some("42".into());
        let out = apply_chunk(messages, " late", "a2");
        assert_eq!(out[0].text, "done");
        assert_eq!(out[0].version("a2").unwrap().text, " late");
    }
}
