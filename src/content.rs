//! Read-only content of the navigation bar and the static sections.

use serde::Serialize;

use crate::models::chat::Section;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct NavItem {
    pub id: Section,
    pub icon: &'static str,
    pub label: &'static str,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Card {
    pub icon: &'static str,
    pub title: &'static str,
    pub text: &'static str,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FaqItem {
    pub question: &'static str,
    pub answer: &'static str,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Setting {
    pub key: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub options: Vec<&'static str>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "section", rename_all = "lowercase")]
pub enum SectionContent {
    Home {
        headline: &'static str,
        intro: &'static str,
        features: Vec<Card>,
        call_to_action: &'static str,
    },
    Faq {
        items: Vec<FaqItem>,
    },
    About {
        mission: &'static str,
        advantages: Vec<&'static str>,
        contact: &'static str,
    },
    Settings {
        settings: Vec<Setting>,
    },
}

pub fn navigation() -> Vec<NavItem> {
    vec![
        NavItem { id: Section::Home, icon: "Home", label: "Home" },
        NavItem { id: Section::Chat, icon: "MessageSquare", label: "Chat" },
        NavItem { id: Section::History, icon: "Clock", label: "History" },
        NavItem { id: Section::Settings, icon: "Settings", label: "Settings" },
        NavItem { id: Section::Faq, icon: "HelpCircle", label: "Questions" },
        NavItem { id: Section::About, icon: "Info", label: "About" }
    ]
}

/// Content of a static section; `None` for the stateful chat and history views.
pub fn section_content(section: Section) -> Option<SectionContent> {
    match section {
        Section::Home =>
            Some(SectionContent::Home {
                headline: "Welcome to AI Chat",
                intro: "A modern AI assistant. Ask questions, get answers, keep your history.",
                features: vec![
                    Card { icon: "Zap", title: "Fast answers", text: "Requests are processed instantly" },
                    Card { icon: "Shield", title: "Security", text: "Your data stays private" },
                    Card { icon: "Globe", title: "Available everywhere", text: "Works without a VPN" }
                ],
                call_to_action: "Start chatting",
            }),
        Section::Faq =>
            Some(SectionContent::Faq {
                items: vec![
                    FaqItem {
                        question: "How do I start using the AI chat?",
                        answer: "Open the Chat section and ask a question. Conversations are saved to your history automatically.",
                    },
                    FaqItem {
                        question: "Does the service need a VPN or proxy?",
                        answer: "No, the service is reachable directly.",
                    },
                    FaqItem {
                        question: "Which AI models are used?",
                        answer: "Several current language models are supported.",
                    },
                    FaqItem {
                        question: "Is the conversation history kept?",
                        answer: "Yes, every conversation is saved automatically and listed in the History section.",
                    }
                ],
            }),
        Section::About =>
            Some(SectionContent::About {
                mission: "Make modern AI tools available to everyone, with a platform that works reliably and fast.",
                advantages: vec![
                    "Direct access without a VPN",
                    "Full support for your language",
                    "Modern language models",
                    "Safe storage of your data"
                ],
                contact: "support@aichat.ru",
            }),
        Section::Settings =>
            Some(SectionContent::Settings {
                settings: vec![
                    Setting {
                        key: "model",
                        title: "AI model",
                        description: "Language model used for the conversation",
                        options: vec!["GPT-4 (recommended)", "GPT-3.5 Turbo", "Claude 3"],
                    },
                    Setting {
                        key: "language",
                        title: "Interface language",
                        description: "Language of the application",
                        options: vec!["Русский", "English"],
                    },
                    Setting {
                        key: "dark_theme",
                        title: "Dark theme",
                        description: "Use the dark colour scheme",
                        options: vec!["off", "on"],
                    }
                ],
            }),
        Section::Chat | Section::History => None,
    }
}
