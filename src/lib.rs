/*!
# Flourish Wizard

A multi-step onboarding wizard that collects a client's campaign setup and
stores it in a Google Sheets spreadsheet copied from a template in Google
Drive.

## Overview

An account manager walks through a fixed sequence of steps. The first step
copies the template spreadsheet into the client's Drive folder; every later
step validates its fields locally and, on "Next", writes them into the tab
that belongs to the step before the wizard advances.

## Architecture

### Wizard core
- **Step catalogue** (`steps`): the ordered list of step descriptors, each
  naming its tab, its columns and its validation rules
- **State store** (`state`): one record per session holding field values,
  the active step, the row written for each single-row tab and the
  spreadsheet id
- **Step controller** (`controller`): validate, write, then advance. Back
  keeps unsaved edits; Finish starts over

### Persistence
- **Row writer** (`sheets`): append, update-at-index and replace-all writes
  into a tab, plus an in-memory workbook
- **Drive** (`drive`): template copies with duplicate-name detection and
  image uploads
- **Google clients** (`google`): the Sheets v4 and Drive v3 REST
  implementations

### HTTP layer
- **app**: axum router with the `/sheets` and `/drive` proxies and the
  cookie-scoped wizard session API

## Row indices

Row indices count data rows from `0`; index `i` lives on spreadsheet row
`i + 2` because row 1 holds the template header. The first write to a
single-row tab appends and records the returned index, every later write
for the same session updates that row in place. Multi-row tabs (events,
offers, images) are cleared and rewritten as a block.

## REST API Endpoints

- `POST /sheets` - Append, update or replace rows in a tab
- `POST /drive` - Copy the template, delete a file, or upload a file
- `GET /api/wizard` - Current step and session snapshot
- `POST /api/wizard/next`, `/back`, `/reset` - Navigate the wizard
- `POST /api/wizard/images`, `DELETE /api/wizard/images/:index` - Manage images
- `GET /api/options` - Account managers, geos and field restriction flag
*/

pub mod config;
pub mod controller;
pub mod drive;
pub mod error;
pub mod sheets;
pub mod state;
pub mod steps;
pub mod validation;
pub mod value;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod google;

pub use config::{Backend, Config};
pub use controller::{StepController, Transition};
pub use drive::{FileStore, MemoryDrive, TemplateProvisioner, UploadedFile};
pub use error::{FieldError, Result, ValidationErrors, WizardError};
pub use sheets::{MemorySheets, Row, SheetWriter, WriteOutcome, WriteRequest};
pub use state::{WizardSnapshot, WizardState};
pub use steps::{Options, StepDescriptor, StepId, StepKind, catalogue};
pub use value::{Entry, FieldValue, Fields};
