/// Closed-sum provider registry — REDESIGN FLAG: dynamic configuration
/// dicts -> tagged variants. A static slice validated at resolution time
/// instead of a free-form string that fails later, deep in a provider call.
pub struct KnownProvider {
    pub id: &'static str,
    pub kind: ProviderKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Llm,
    Stt,
    Tts,
    Embedding,
}

pub const KNOWN_PROVIDERS: &[KnownProvider] = &[
    KnownProvider { id: "groq", kind: ProviderKind::Llm },
    KnownProvider { id: "openai", kind: ProviderKind::Llm },
    KnownProvider { id: "cerebras", kind: ProviderKind::Llm },
    KnownProvider { id: "anthropic", kind: ProviderKind::Llm },
    KnownProvider { id: "deepgram", kind: ProviderKind::Stt },
    KnownProvider { id: "cartesia", kind: ProviderKind::Stt },
    KnownProvider { id: "cartesia-tts", kind: ProviderKind::Tts },
    KnownProvider { id: "elevenlabs", kind: ProviderKind::Tts },
    KnownProvider { id: "siliconflow", kind: ProviderKind::Embedding },
    KnownProvider { id: "local-bge", kind: ProviderKind::Embedding },
    KnownProvider { id: "openai-embedding", kind: ProviderKind::Embedding },
];

pub fn lookup(id: &str, kind: ProviderKind) -> Option<&'static KnownProvider> {
    KNOWN_PROVIDERS.iter().find(|p| p.id == id && p.kind == kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_llm_provider_resolves() {
        assert!(lookup("groq", ProviderKind::Llm).is_some());
    }

    #[test]
    fn unknown_provider_does_not_resolve() {
        assert!(lookup("groq", ProviderKind::Stt).is_none());
        assert!(lookup("not-a-provider", ProviderKind::Llm).is_none());
    }
}
