//! SOAP request bodies for the EWS operations we use.

use std::fmt::Write;

use quick_xml::escape::escape;

/// An item reference as returned by `FindItem`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    pub id: String,
    pub change_key: Option<String>,
}

/// A file to inline into a `CreateItem` request.
#[derive(Debug, Clone)]
pub struct InlineAttachment {
    pub name: String,
    /// Base64 of the file content.
    pub content: String,
}

/// Where a sent message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Send and keep a copy in Sent Items.
    SendAndSaveCopy,
    /// Send without saving.
    SendOnly,
}

/// Wrap an operation body in a SOAP envelope.
pub fn envelope(body: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"xmlns:t="http://schemas.microsoft.com/exchange/services/2006/types" "#,
            r#"xmlns:m="http://schemas.microsoft.com/exchange/services/2006/messages">"#,
            r#"<soap:Header><t:RequestServerVersion Version="Exchange2013"/></soap:Header>"#,
            "<soap:Body>{}</soap:Body>",
            "</soap:Envelope>"
        ),
        body
    )
}

/// Unread inbox messages, newest first, at most `limit`.
pub fn find_unread(limit: usize) -> String {
    format!(
        concat!(
            r#"<m:FindItem Traversal="Shallow">"#,
            "<m:ItemShape>",
            "<t:BaseShape>IdOnly</t:BaseShape>",
            "<t:AdditionalProperties>",
            r#"<t:FieldURI FieldURI="item:Subject"/>"#,
            r#"<t:FieldURI FieldURI="message:Sender"/>"#,
            r#"<t:FieldURI FieldURI="message:From"/>"#,
            r#"<t:FieldURI FieldURI="item:DateTimeReceived"/>"#,
            r#"<t:FieldURI FieldURI="item:HasAttachments"/>"#,
            "</t:AdditionalProperties>",
            "</m:ItemShape>",
            r#"<m:IndexedPageItemView MaxEntriesReturned="{}" Offset="0" BasePoint="Beginning"/>"#,
            "<m:Restriction>",
            "<t:IsEqualTo>",
            r#"<t:FieldURI FieldURI="message:IsRead"/>"#,
            r#"<t:FieldURIOrConstant><t:Constant Value="false"/></t:FieldURIOrConstant>"#,
            "</t:IsEqualTo>",
            "</m:Restriction>",
            "<m:SortOrder>",
            r#"<t:FieldOrder Order="Descending"><t:FieldURI FieldURI="item:DateTimeReceived"/></t:FieldOrder>"#,
            "</m:SortOrder>",
            r#"<m:ParentFolderIds><t:DistinguishedFolderId Id="inbox"/></m:ParentFolderIds>"#,
            "</m:FindItem>"
        ),
        limit
    )
}

/// Attachment metadata for the given items.
pub fn get_attachments(items: &[ItemRef]) -> String {
    let mut body = String::from(concat!(
        "<m:GetItem>",
        "<m:ItemShape>",
        "<t:BaseShape>IdOnly</t:BaseShape>",
        "<t:AdditionalProperties>",
        r#"<t:FieldURI FieldURI="item:Attachments"/>"#,
        "</t:AdditionalProperties>",
        "</m:ItemShape>",
        "<m:ItemIds>"
    ));
    for item in items {
        push_item_id(&mut body, item);
    }
    body.push_str("</m:ItemIds></m:GetItem>");
    body
}

/// Flag the given items as read.
pub fn mark_read(items: &[ItemRef]) -> String {
    let mut body = String::from(concat!(
        r#"<m:UpdateItem MessageDisposition="SaveOnly" ConflictResolution="AutoResolve" SuppressReadReceipts="true">"#,
        "<m:ItemChanges>"
    ));
    for item in items {
        body.push_str("<t:ItemChange>");
        push_item_id(&mut body, item);
        body.push_str(concat!(
            "<t:Updates><t:SetItemField>",
            r#"<t:FieldURI FieldURI="message:IsRead"/>"#,
            "<t:Message><t:IsRead>true</t:IsRead></t:Message>",
            "</t:SetItemField></t:Updates>",
            "</t:ItemChange>"
        ));
    }
    body.push_str("</m:ItemChanges></m:UpdateItem>");
    body
}

/// A plain-text message to `to`, sent in one round trip.
pub fn create_message(
    to: &[String],
    subject: &str,
    body_text: &str,
    attachments: &[InlineAttachment],
    disposition: Disposition,
) -> String {
    let mut body = String::new();
    match disposition {
        Disposition::SendAndSaveCopy => body.push_str(concat!(
            r#"<m:CreateItem MessageDisposition="SendAndSaveCopy">"#,
            r#"<m:SavedItemFolderId><t:DistinguishedFolderId Id="sentitems"/></m:SavedItemFolderId>"#
        )),
        Disposition::SendOnly => body.push_str(r#"<m:CreateItem MessageDisposition="SendOnly">"#),
    }

    // Element order follows the MessageType schema
    let _ = write!(
        body,
        r#"<m:Items><t:Message><t:Subject>{}</t:Subject><t:Body BodyType="Text">{}</t:Body>"#,
        escape(subject),
        escape(body_text)
    );

    if !attachments.is_empty() {
        body.push_str("<t:Attachments>");
        for attachment in attachments {
            let _ = write!(
                body,
                "<t:FileAttachment><t:Name>{}</t:Name><t:Content>{}</t:Content></t:FileAttachment>",
                escape(attachment.name.as_str()),
                attachment.content
            );
        }
        body.push_str("</t:Attachments>");
    }

    body.push_str("<t:ToRecipients>");
    for address in to {
        let _ = write!(
            body,
            "<t:Mailbox><t:EmailAddress>{}</t:EmailAddress></t:Mailbox>",
            escape(address.as_str())
        );
    }
    body.push_str("</t:ToRecipients></t:Message></m:Items></m:CreateItem>");
    body
}

fn push_item_id(body: &mut String, item: &ItemRef) {
    let _ = match &item.change_key {
        Some(change_key) => write!(
            body,
            r#"<t:ItemId Id="{}" ChangeKey="{}"/>"#,
            escape(item.id.as_str()),
            escape(change_key.as_str())
        ),
        None => write!(body, r#"<t:ItemId Id="{}"/>"#, escape(item.id.as_str())),
    };
}
