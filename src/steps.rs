//! The ordered list of wizard steps.
//!
//! Each step is a descriptor: which tab it writes, how (one addressable row or
//! a whole block of rows) and which rules guard it. Reordering or inserting a
//! step only changes the list built by [`catalogue`].

use serde::Serialize;

use crate::error::ValidationErrors;
use crate::validation::{
    BUNDLE_ID_REGEX, Check, EMAIL_REGEX, EntryRules, FieldRule, OUTPUT_NAME_REGEX, PHONE_REGEX,
    URL_REGEX, validate_entries, validate_fields,
};
use crate::value::{FieldValue, Fields};

pub const CLIENT_INFO_TAB: &str = "ClientInfo";
pub const CLIENT_DETAILS_TAB: &str = "ClientDetails";
pub const APP_TAB: &str = "App";
pub const EVENTS_TAB: &str = "Events";
pub const CAMPAIGN_TAB: &str = "Campaign";
pub const OFFERS_TAB: &str = "Offers";
pub const IMAGES_TAB: &str = "Images";

/// Placeholder shown as the first account manager option
pub const SELECT_PLACEHOLDER: &str = "-- Select --";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StepId {
    ClientInfo,
    ClientBasics,
    ClientDetails,
    AppInformation,
    Events,
    Campaign,
    Offers,
    Images,
    Finish,
}

/// How a step persists its values
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepKind {
    /// Copies the template spreadsheet; establishes the session's sheet id
    Provision,
    /// One addressable row, columns in template order
    SingleRow {
        tab: &'static str,
        columns: &'static [&'static str],
    },
    /// The whole data region of a tab, one row per entry of `list`
    MultiRow {
        tab: &'static str,
        list: &'static str,
        columns: &'static [&'static str],
    },
    /// Terminal step; moving past it starts a new session
    Finish,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepDescriptor {
    pub id: StepId,
    pub title: &'static str,
    pub kind: StepKind,
    #[serde(skip)]
    pub rules: Vec<FieldRule>,
    #[serde(skip)]
    pub entry_rules: Option<EntryRules>,
}

impl StepDescriptor {
    /// Tab written by this step, if any
    pub fn tab(&self) -> Option<&'static str> {
        match self.kind {
            StepKind::SingleRow { tab, .. } | StepKind::MultiRow { tab, .. } => Some(tab),
            StepKind::Provision | StepKind::Finish => None,
        }
    }

    pub fn is_multi_row(&self) -> bool {
        matches!(self.kind, StepKind::MultiRow { .. })
    }

    /// Names of the fields this step owns
    pub fn field_names(&self) -> Vec<&'static str> {
        match self.kind {
            StepKind::SingleRow { columns, .. } => columns.to_vec(),
            StepKind::MultiRow { list, .. } => vec![list],
            StepKind::Provision => PROVISION_FIELDS.to_vec(),
            StepKind::Finish => Vec::new(),
        }
    }

    /// Runs every rule of the step against `values`
    pub fn validate(&self, values: &Fields) -> ValidationErrors {
        let mut errors = validate_fields(values, &self.rules);
        if let (StepKind::MultiRow { list, .. }, Some(entry_rules)) = (&self.kind, &self.entry_rules)
        {
            for e in validate_entries(values, list, entry_rules).errors() {
                errors.add(e.field.clone(), e.message.clone());
            }
        }
        errors
    }
}

/// Option lists that feed the select-style fields
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    pub account_managers: Vec<String>,
    pub geos: Vec<String>,
    /// When disabled, account managers are free text
    pub field_restrictions: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            account_managers: vec!["Jane Smith".to_string(), "John Doe".to_string()],
            geos: ["AU", "CA", "UK", "US"].iter().map(|g| g.to_string()).collect(),
            field_restrictions: true,
        }
    }
}

const PROVISION_FIELDS: &[&str] = &["accountManager", "outputName", "folderUrl"];
const CLIENT_BASICS_COLUMNS: &[&str] =
    &["clientName", "billingName", "accountManager", "flourishClientName"];
const CLIENT_DETAILS_COLUMNS: &[&str] = &["clientName", "clientEmail", "clientPhone", "clientWebsite"];
const APP_COLUMNS: &[&str] = &[
    "appName",
    "appBundleId",
    "appStoreUrl",
    "playStoreUrl",
    "appDescription",
];
const EVENT_COLUMNS: &[&str] = &["eventName", "eventType", "eventValue", "isIAP"];
const CAMPAIGN_COLUMNS: &[&str] = &[
    "campaignName",
    "campaignGeo",
    "campaignStartDate",
    "campaignEndDate",
    "campaignBudget",
];
const OFFER_COLUMNS: &[&str] = &["offerName", "offerType", "offerValue", "offerDescription"];
pub const IMAGE_COLUMNS: &[&str] = &["name", "fileId", "webViewLink", "thumbnailLink"];

/// Builds the fixed step order.
pub fn catalogue(options: &Options) -> Vec<StepDescriptor> {
    let mut manager_rules = vec![FieldRule::new(
        "accountManager",
        Check::Required,
        "Account Manager is required",
    )];
    if options.field_restrictions {
        manager_rules.push(FieldRule::new(
            "accountManager",
            Check::OneOf(options.account_managers.clone()),
            "Please select an account manager.",
        ));
    }

    let mut client_info_rules = manager_rules.clone();
    client_info_rules.extend([
        FieldRule::new("outputName", Check::Required, "Output file name is required"),
        FieldRule::new(
            "outputName",
            Check::Matches(&OUTPUT_NAME_REGEX),
            "Only letters, numbers, underscores, and hyphens are allowed",
        ),
        FieldRule::new("folderUrl", Check::Required, "Output folder location is required"),
    ]);

    let mut basics_rules = vec![
        FieldRule::new(
            "clientName",
            Check::Required,
            "Please enter the client common name or DBA name.",
        ),
        FieldRule::new("billingName", Check::Required, "Please enter the client billing name."),
        FieldRule::new("accountManager", Check::Required, "Please select an account manager."),
        FieldRule::new(
            "accountManager",
            Check::NotEqual(SELECT_PLACEHOLDER),
            "Please select an account manager.",
        ),
    ];
    if options.field_restrictions {
        basics_rules.push(FieldRule::new(
            "accountManager",
            Check::OneOf(options.account_managers.clone()),
            "Please select an account manager.",
        ));
    }
    basics_rules.push(FieldRule::new(
        "flourishClientName",
        Check::Required,
        "Please enter the Flourish client name.",
    ));

    vec![
        StepDescriptor {
            id: StepId::ClientInfo,
            title: "Client Info",
            kind: StepKind::Provision,
            rules: client_info_rules,
            entry_rules: None,
        },
        StepDescriptor {
            id: StepId::ClientBasics,
            title: "Client Basics",
            kind: StepKind::SingleRow {
                tab: CLIENT_INFO_TAB,
                columns: CLIENT_BASICS_COLUMNS,
            },
            rules: basics_rules,
            entry_rules: None,
        },
        StepDescriptor {
            id: StepId::ClientDetails,
            title: "Client Details",
            kind: StepKind::SingleRow {
                tab: CLIENT_DETAILS_TAB,
                columns: CLIENT_DETAILS_COLUMNS,
            },
            rules: vec![
                FieldRule::new("clientName", Check::Required, "Client name is required"),
                FieldRule::new("clientEmail", Check::Required, "Client email is required"),
                FieldRule::new("clientEmail", Check::Matches(&EMAIL_REGEX), "Invalid email address"),
                FieldRule::new("clientPhone", Check::Required, "Client phone is required"),
                FieldRule::new("clientPhone", Check::Matches(&PHONE_REGEX), "Invalid phone number"),
                FieldRule::new("clientWebsite", Check::Required, "Client website is required"),
                FieldRule::new("clientWebsite", Check::Matches(&URL_REGEX), "Invalid website URL"),
            ],
            entry_rules: None,
        },
        StepDescriptor {
            id: StepId::AppInformation,
            title: "App Information",
            kind: StepKind::SingleRow {
                tab: APP_TAB,
                columns: APP_COLUMNS,
            },
            rules: vec![
                FieldRule::new("appName", Check::Required, "App name is required"),
                FieldRule::new("appBundleId", Check::Required, "App bundle ID is required"),
                FieldRule::new(
                    "appBundleId",
                    Check::Matches(&BUNDLE_ID_REGEX),
                    "Invalid bundle ID format",
                ),
                FieldRule::new("appStoreUrl", Check::Required, "App Store URL is required"),
                FieldRule::new("appStoreUrl", Check::Matches(&URL_REGEX), "Invalid App Store URL"),
                FieldRule::new("playStoreUrl", Check::Required, "Play Store URL is required"),
                FieldRule::new("playStoreUrl", Check::Matches(&URL_REGEX), "Invalid Play Store URL"),
                FieldRule::new("appDescription", Check::Required, "App description is required"),
                FieldRule::new(
                    "appDescription",
                    Check::MinChars(10),
                    "Description must be at least 10 characters",
                ),
            ],
            entry_rules: None,
        },
        StepDescriptor {
            id: StepId::Events,
            title: "Events",
            kind: StepKind::MultiRow {
                tab: EVENTS_TAB,
                list: "events",
                columns: EVENT_COLUMNS,
            },
            rules: Vec::new(),
            entry_rules: Some(EntryRules {
                min_one: Some("At least one event is required"),
                entry: vec![
                    FieldRule::new("eventName", Check::Required, "Event name is required"),
                    FieldRule::new("eventType", Check::Required, "Event type is required"),
                ],
            }),
        },
        StepDescriptor {
            id: StepId::Campaign,
            title: "Campaign",
            kind: StepKind::SingleRow {
                tab: CAMPAIGN_TAB,
                columns: CAMPAIGN_COLUMNS,
            },
            rules: vec![
                FieldRule::new("campaignName", Check::Required, "Campaign name is required"),
                FieldRule::new("campaignGeo", Check::Required, "Please select a geo"),
                FieldRule::new(
                    "campaignGeo",
                    Check::OneOf(options.geos.clone()),
                    "Invalid geo selected",
                ),
                FieldRule::new("campaignStartDate", Check::Required, "Start date is required"),
                FieldRule::new("campaignStartDate", Check::Date, "Start date must be a valid date"),
                FieldRule::new(
                    "campaignStartDate",
                    Check::NotAfter("campaignEndDate"),
                    "Start date must be before end date",
                ),
                FieldRule::new("campaignEndDate", Check::Required, "End date is required"),
                FieldRule::new("campaignEndDate", Check::Date, "End date must be a valid date"),
                FieldRule::new(
                    "campaignEndDate",
                    Check::NotBefore("campaignStartDate"),
                    "End date must be after start date",
                ),
                FieldRule::new("campaignBudget", Check::Required, "Campaign budget is required"),
                FieldRule::new("campaignBudget", Check::Positive, "Budget must be positive"),
            ],
            entry_rules: None,
        },
        StepDescriptor {
            id: StepId::Offers,
            title: "Offers",
            kind: StepKind::MultiRow {
                tab: OFFERS_TAB,
                list: "offers",
                columns: OFFER_COLUMNS,
            },
            rules: Vec::new(),
            entry_rules: Some(EntryRules {
                min_one: Some("At least one offer is required"),
                entry: vec![
                    FieldRule::new("offerName", Check::Required, "Offer name is required"),
                    FieldRule::new("offerType", Check::Required, "Offer type is required"),
                    FieldRule::new(
                        "offerDescription",
                        Check::Required,
                        "Offer description is required",
                    ),
                    FieldRule::new(
                        "offerDescription",
                        Check::MinChars(10),
                        "Description must be at least 10 characters",
                    ),
                ],
            }),
        },
        StepDescriptor {
            id: StepId::Images,
            title: "Images",
            kind: StepKind::MultiRow {
                tab: IMAGES_TAB,
                list: "images",
                columns: IMAGE_COLUMNS,
            },
            rules: Vec::new(),
            entry_rules: Some(EntryRules {
                min_one: None,
                entry: vec![
                    FieldRule::new("name", Check::Required, "Image name is missing"),
                    FieldRule::new("fileId", Check::Required, "Image has not been uploaded"),
                ],
            }),
        },
        StepDescriptor {
            id: StepId::Finish,
            title: "Finish",
            kind: StepKind::Finish,
            rules: Vec::new(),
            entry_rules: None,
        },
    ]
}

/// Empty value for every field any step owns, plus the derived `folderId`.
pub fn initial_fields(steps: &[StepDescriptor]) -> Fields {
    let mut fields = Fields::new();
    for step in steps {
        for name in step.field_names() {
            let empty = if step.is_multi_row() {
                FieldValue::Entries(Vec::new())
            } else {
                FieldValue::text("")
            };
            fields.insert(name.to_string(), empty);
        }
    }
    if steps.iter().any(|s| matches!(s.kind, StepKind::Provision)) {
        fields.insert("folderId".to_string(), FieldValue::text(""));
    }
    fields
}

/// Header row of every tab the template must contain, in step order
pub fn template_tabs(steps: &[StepDescriptor]) -> Vec<(&'static str, Vec<&'static str>)> {
    steps
        .iter()
        .filter_map(|step| match step.kind {
            StepKind::SingleRow { tab, columns } | StepKind::MultiRow { tab, columns, .. } => {
                Some((tab, columns.to_vec()))
            }
            StepKind::Provision | StepKind::Finish => None,
        })
        .collect()
}
