//! Preview-only auth bypass.
//!
//! Generated apps ship real auth. A preview has no identity provider, so the
//! auth entry point is replaced with a fixed "preview user" session and the
//! middleware with a pass-through. These writes are destructive: the original
//! files are not kept. Re-applying produces identical files.

use std::io;
use std::path::Path;

use crate::config::PreviewConfig;

pub const PREVIEW_USER_ID: &str = "preview-user";
pub const PREVIEW_USER_EMAIL: &str = "preview@appforge.local";

const AUTH_MODULE: &str = r#"// Preview build: authentication is bypassed with a fixed session.
export const PREVIEW_USER = {
  id: "preview-user",
  name: "Preview User",
  email: "preview@appforge.local",
  image: null,
};

const session = {
  user: PREVIEW_USER,
  expires: new Date(Date.now() + 24 * 60 * 60 * 1000).toISOString(),
};

export async function auth() {
  return session;
}

export async function getServerSession() {
  return session;
}

export async function getCurrentUser() {
  return PREVIEW_USER;
}

export async function signIn() {
  return session;
}

export async function signOut() {
  return undefined;
}

export const handlers = {
  GET: async () => Response.json(session),
  POST: async () => Response.json(session),
};
"#;

const MIDDLEWARE_MODULE: &str = r#"// Preview build: every request passes through.
import { NextResponse } from "next/server";

export function middleware() {
  return NextResponse.next();
}

export const config = {
  matcher: [],
};
"#;

/// Overwrite the auth and middleware entry points in `workspace`.
pub fn apply_preview_auth_bypass(workspace: &Path, config: &PreviewConfig) -> io::Result<()> {
    write_module(&workspace.join(&config.auth_file), AUTH_MODULE)?;
    write_module(&workspace.join(&config.middleware_file), MIDDLEWARE_MODULE)?;
    tracing::debug!(workspace = %workspace.display(), "applied preview auth bypass");
    Ok(())
}

fn write_module(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}
